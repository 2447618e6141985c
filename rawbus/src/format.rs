//! Client-visible request record and its field encodings

use rawbus_driver::packet::{Ack, ResponseCode};

/// Version of the request record protocol implemented by the engine
pub const PROTOCOL_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum RequestKind {
    Handshake = 1,
    ListHosts = 2,
    BindHost = 3,
    AsyncRead = 100,
    AsyncWrite = 101,
    Lock = 102,
    Lock64 = 103,
    IsoListen = 200,
    BusReset = 10000,
    IsoReceive = 10001,
}

impl RequestKind {
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Handshake),
            2 => Some(Self::ListHosts),
            3 => Some(Self::BindHost),
            100 => Some(Self::AsyncRead),
            101 => Some(Self::AsyncWrite),
            102 => Some(Self::Lock),
            103 => Some(Self::Lock64),
            200 => Some(Self::IsoListen),
            10000 => Some(Self::BusReset),
            10001 => Some(Self::IsoReceive),
            _ => None,
        }
    }

    pub const fn into_u32(self) -> u32 {
        self as u32
    }
}

impl From<RequestKind> for u32 {
    fn from(value: RequestKind) -> Self {
        value.into_u32()
    }
}

/// Outcome reported in the `error` field of a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    Success,
    ProtocolVersionMismatch,
    OutOfOrderRequest,
    GenerationChanged,
    InvalidArgument,
    PayloadFault,
    AlreadySubscribed,
    UntidyLength,
    SendError,
    Aborted,
    Timeout,
    /// Failed transaction: `(ack << 16) | rcode`
    Transaction { ack: u8, rcode: u8 },
    /// Value unknown to this version
    Other(u32),
}

impl ErrorCode {
    const PROTOCOL_VERSION_MISMATCH: i32 = -1001;
    const OUT_OF_ORDER_REQUEST: i32 = -1002;
    const GENERATION_CHANGED: i32 = -1003;
    const INVALID_ARGUMENT: i32 = -1004;
    const PAYLOAD_FAULT: i32 = -1005;
    const ALREADY_SUBSCRIBED: i32 = -1006;
    const UNTIDY_LENGTH: i32 = -1021;
    const SEND_ERROR: i32 = -1100;
    const ABORTED: i32 = -1101;
    const TIMEOUT: i32 = -1102;

    const ACK_SHIFT: u32 = 16;
    const TRANSACTION_MASK: u32 = 0x000f_000f;

    /// Classifies the outcome of a remote transaction
    pub const fn from_response(ack: Ack, rcode: ResponseCode) -> Self {
        match (ack, rcode) {
            (Ack::None | Ack::SendError, _) => Self::SendError,
            (Ack::Aborted, _) => Self::Aborted,
            (Ack::Timeout, _) => Self::Timeout,
            (Ack::Pending | Ack::Complete, ResponseCode::Complete) => Self::Success,
            (ack, rcode) => match ack.code() {
                Some(ack) => Self::Transaction {
                    ack,
                    rcode: rcode.into_u8(),
                },
                None => Self::SendError,
            },
        }
    }

    /// Classifies the status of an operation executed on the local node
    pub const fn from_local(rcode: ResponseCode) -> Self {
        match rcode {
            ResponseCode::Complete => Self::Success,
            rcode => Self::Transaction {
                ack: 0x1,
                rcode: rcode.into_u8(),
            },
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub const fn into_u32(self) -> u32 {
        let value = match self {
            Self::Success => 0,
            Self::ProtocolVersionMismatch => Self::PROTOCOL_VERSION_MISMATCH,
            Self::OutOfOrderRequest => Self::OUT_OF_ORDER_REQUEST,
            Self::GenerationChanged => Self::GENERATION_CHANGED,
            Self::InvalidArgument => Self::INVALID_ARGUMENT,
            Self::PayloadFault => Self::PAYLOAD_FAULT,
            Self::AlreadySubscribed => Self::ALREADY_SUBSCRIBED,
            Self::UntidyLength => Self::UNTIDY_LENGTH,
            Self::SendError => Self::SEND_ERROR,
            Self::Aborted => Self::ABORTED,
            Self::Timeout => Self::TIMEOUT,
            Self::Transaction { ack, rcode } => {
                return ((ack as u32) << Self::ACK_SHIFT) | rcode as u32;
            }
            Self::Other(value) => return value,
        };
        value as u32
    }

    pub const fn from_u32(value: u32) -> Self {
        match value as i32 {
            0 => Self::Success,
            Self::PROTOCOL_VERSION_MISMATCH => Self::ProtocolVersionMismatch,
            Self::OUT_OF_ORDER_REQUEST => Self::OutOfOrderRequest,
            Self::GENERATION_CHANGED => Self::GenerationChanged,
            Self::INVALID_ARGUMENT => Self::InvalidArgument,
            Self::PAYLOAD_FAULT => Self::PayloadFault,
            Self::ALREADY_SUBSCRIBED => Self::AlreadySubscribed,
            Self::UNTIDY_LENGTH => Self::UntidyLength,
            Self::SEND_ERROR => Self::SendError,
            Self::ABORTED => Self::Aborted,
            Self::TIMEOUT => Self::Timeout,
            _ if value & !Self::TRANSACTION_MASK == 0 => Self::Transaction {
                ack: (value >> Self::ACK_SHIFT) as u8,
                rcode: value as u8,
            },
            _ => Self::Other(value),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(value: ErrorCode) -> Self {
        value.into_u32()
    }
}

impl From<u32> for ErrorCode {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

/// Fixed-size request and reply record exchanged with a client
///
/// Layout, little-endian:
/// ```text
/// offset  size  field
///      0     4  kind
///      4     4  generation
///      8     4  misc
///     12     4  error
///     16     4  length
///     20     4  reserved, zero
///     24     8  address
///     32     8  send_buffer
///     40     8  recv_buffer
///     48     8  tag
///     56     8  sender
/// ```
/// A reply echoes the request except for `generation`, `misc`, `error`, and `length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestRecord {
    pub kind: u32,
    pub generation: u32,
    pub misc: u32,
    pub error: u32,
    pub length: u32,
    pub address: u64,
    pub send_buffer: u64,
    pub recv_buffer: u64,
    pub tag: u64,
    pub sender: u64,
}

impl RequestRecord {
    pub const SIZE: usize = 64;

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let u32_at = |offset: usize| {
            let mut field = [0; 4];
            field.copy_from_slice(&bytes[offset..offset + 4]);
            u32::from_le_bytes(field)
        };
        let u64_at = |offset: usize| {
            let mut field = [0; 8];
            field.copy_from_slice(&bytes[offset..offset + 8]);
            u64::from_le_bytes(field)
        };

        Self {
            kind: u32_at(0),
            generation: u32_at(4),
            misc: u32_at(8),
            error: u32_at(12),
            length: u32_at(16),
            address: u64_at(24),
            send_buffer: u64_at(32),
            recv_buffer: u64_at(40),
            tag: u64_at(48),
            sender: u64_at(56),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.kind.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.generation.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.misc.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.error.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.length.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.address.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.send_buffer.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.recv_buffer.to_le_bytes());
        bytes[48..56].copy_from_slice(&self.tag.to_le_bytes());
        bytes[56..64].copy_from_slice(&self.sender.to_le_bytes());
        bytes
    }

    pub fn request_kind(&self) -> Option<RequestKind> {
        RequestKind::from_u32(self.kind)
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_u32(self.error)
    }
}

/// Host enumeration entry returned by a list-hosts request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostListEntry {
    pub nodes: i32,
    /// NUL-padded controller name
    pub name: [u8; Self::NAME_SIZE],
}

impl HostListEntry {
    pub const SIZE: usize = 36;
    pub const NAME_SIZE: usize = 32;

    /// Creates an entry with the name truncated to leave a terminating NUL
    pub fn new(nodes: u16, name: &str) -> Self {
        let mut entry = Self {
            nodes: nodes.into(),
            name: [0; Self::NAME_SIZE],
        };
        let length = name.len().min(Self::NAME_SIZE - 1);
        entry.name[..length].copy_from_slice(&name.as_bytes()[..length]);
        entry
    }

    pub fn name_bytes(&self) -> &[u8] {
        let length = self
            .name
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(Self::NAME_SIZE);
        &self.name[..length]
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[..4].copy_from_slice(&self.nodes.to_le_bytes());
        bytes[4..].copy_from_slice(&self.name);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut nodes = [0; 4];
        nodes.copy_from_slice(&bytes[..4]);
        let mut name = [0; Self::NAME_SIZE];
        name.copy_from_slice(&bytes[4..]);
        Self {
            nodes: i32::from_le_bytes(nodes),
            name,
        }
    }
}

//! Transport packet object and transport status codes

use alloc::vec::Vec;
use rawbus_core::{ExtendedCode, Label, NodeId, Offset, QUADLET_SIZE};

use crate::OutOfMemory;
use crate::link::Completion;

/// Asynchronous request packet type
///
/// Block transfers carry the transfer length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketKind {
    ReadQuadlet,
    ReadBlock { length: usize },
    WriteQuadlet,
    WriteBlock { length: usize },
    Lock { code: ExtendedCode },
}

impl PacketKind {
    /// Length of data carried by the request packet
    pub const fn payload_len(&self) -> usize {
        match *self {
            Self::ReadQuadlet | Self::ReadBlock { .. } => 0,
            Self::WriteQuadlet => QUADLET_SIZE,
            Self::WriteBlock { length } => length,
            Self::Lock { code } => code.payload_len(),
        }
    }

    /// Length of data expected in the response packet
    pub const fn response_len(&self) -> usize {
        match *self {
            Self::ReadQuadlet => QUADLET_SIZE,
            Self::ReadBlock { length } => length,
            Self::WriteQuadlet | Self::WriteBlock { .. } => 0,
            Self::Lock { .. } => QUADLET_SIZE,
        }
    }
}

/// Asynchronous request ready for transmission
///
/// The engine fills the payload and attaches a completion before handing the packet to
/// [`crate::transport::Transport::send`].
#[derive(Debug)]
pub struct Packet {
    pub kind: PacketKind,
    pub destination: NodeId,
    pub offset: Offset,
    pub label: Label,
    payload: Vec<u8>,
    completion: Option<Completion>,
}

impl Packet {
    /// Allocates a packet with a zeroed payload of the size required by the kind
    pub fn new(
        kind: PacketKind,
        destination: NodeId,
        offset: Offset,
        label: Label,
    ) -> Result<Self, OutOfMemory> {
        let length = kind.payload_len();
        let mut payload = Vec::new();
        payload.try_reserve_exact(length).map_err(|_| OutOfMemory)?;
        payload.resize(length, 0);
        Ok(Self {
            kind,
            destination,
            offset,
            label,
            payload,
            completion: None,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    pub fn set_completion(&mut self, completion: Completion) {
        self.completion = Some(completion);
    }

    pub fn take_completion(&mut self) -> Option<Completion> {
        self.completion.take()
    }
}

/// Splits a lock payload into big-endian argument and data quadlets
///
/// Single-quadlet payloads carry the data only, with a zero argument.
pub fn lock_operands(payload: &[u8]) -> Option<(u32, u32)> {
    let quadlet = |index: usize| {
        let mut bytes = [0; QUADLET_SIZE];
        bytes.copy_from_slice(&payload[index * QUADLET_SIZE..(index + 1) * QUADLET_SIZE]);
        u32::from_be_bytes(bytes)
    };
    match payload.len() {
        QUADLET_SIZE => Some((0, quadlet(0))),
        8 => Some((quadlet(0), quadlet(1))),
        _ => None,
    }
}

/// Acknowledge code of a sent packet
///
/// Includes pseudo codes for transmission failures detected by the controller itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ack {
    /// Nothing acknowledged the packet
    None,
    SendError,
    Aborted,
    Timeout,
    Complete,
    Pending,
    BusyX,
    BusyA,
    BusyB,
    DataError,
    TypeError,
    Other(u8),
}

impl Ack {
    /// 4-bit on-bus acknowledge code. Pseudo codes have none.
    pub const fn code(self) -> Option<u8> {
        match self {
            Self::None | Self::SendError | Self::Aborted | Self::Timeout => None,
            Self::Complete => Some(0x1),
            Self::Pending => Some(0x2),
            Self::BusyX => Some(0x4),
            Self::BusyA => Some(0x5),
            Self::BusyB => Some(0x6),
            Self::DataError => Some(0xd),
            Self::TypeError => Some(0xe),
            Self::Other(code) => Some(code & 0xf),
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code & 0xf {
            0x1 => Self::Complete,
            0x2 => Self::Pending,
            0x4 => Self::BusyX,
            0x5 => Self::BusyA,
            0x6 => Self::BusyB,
            0xd => Self::DataError,
            0xe => Self::TypeError,
            other => Self::Other(other),
        }
    }
}

/// Response code of a split transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponseCode {
    Complete,
    ConflictError,
    DataError,
    TypeError,
    AddressError,
    Other(u8),
}

impl ResponseCode {
    pub const fn into_u8(self) -> u8 {
        match self {
            Self::Complete => 0x0,
            Self::ConflictError => 0x4,
            Self::DataError => 0x5,
            Self::TypeError => 0x6,
            Self::AddressError => 0x7,
            Self::Other(code) => code & 0xf,
        }
    }

    pub const fn from_u8(code: u8) -> Self {
        match code & 0xf {
            0x0 => Self::Complete,
            0x4 => Self::ConflictError,
            0x5 => Self::DataError,
            0x6 => Self::TypeError,
            0x7 => Self::AddressError,
            other => Self::Other(other),
        }
    }
}

/// Outcome of a transaction reported by a driver
///
/// `data` holds the response payload; it is ignored unless the transaction succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response<'a> {
    pub ack: Ack,
    pub rcode: ResponseCode,
    pub data: &'a [u8],
}

impl<'a> Response<'a> {
    /// True if the responder executed the request
    ///
    /// Split transactions succeed with a pending acknowledge followed by a complete response.
    /// Unified transactions succeed with a complete acknowledge.
    pub const fn is_success(&self) -> bool {
        matches!(
            (self.ack, self.rcode),
            (Ack::Pending | Ack::Complete, ResponseCode::Complete)
        )
    }
}

//! Serial bus protocol core data types
//!
//! This crate provides basic value types used by other rawbus crates.
//! Rawbus users should not depend on this crate directly. Use the `rawbus::core` reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Size of the bus addressing unit in bytes
pub const QUADLET_SIZE: usize = 4;

/// 16-bit node identifier: 10-bit bus number followed by a 6-bit physical id
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u16);

impl NodeId {
    const PHY_BITS: u32 = 6;
    const PHY_MASK: u16 = (1 << Self::PHY_BITS) - 1;

    /// Bus number addressing the bus the sender is attached to
    pub const LOCAL_BUS: u16 = 0x3ff;
    /// Physical id addressing every node on a bus
    pub const BROADCAST_PHY: u8 = 0x3f;

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn from_parts(bus: u16, phy: u8) -> Self {
        Self((bus << Self::PHY_BITS) | (phy as u16 & Self::PHY_MASK))
    }

    pub const fn bus(self) -> u16 {
        self.0 >> Self::PHY_BITS
    }

    pub const fn phy(self) -> u8 {
        (self.0 & Self::PHY_MASK) as u8
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for NodeId {
    fn from(value: u16) -> Self {
        Self::new(value)
    }
}

impl From<NodeId> for u16 {
    fn from(value: NodeId) -> Self {
        value.into_u16()
    }
}

/// 48-bit offset into the address space of a node
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Offset(u64);

impl Offset {
    const MAX_VALUE: u64 = (1 << 48) - 1;
    pub const MAX: Offset = Offset(Self::MAX_VALUE);

    pub const fn new(value: u64) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_u64_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_u64_truncating(value: u64) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u64(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Offset {
    type Error = InvalidValue;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// 64-bit bus address: the target node in the top 16 bits, the offset in the low 48 bits
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address(u64);

impl Address {
    const NODE_SHIFT: u32 = 48;

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn from_parts(node: NodeId, offset: Offset) -> Self {
        Self(((node.into_u16() as u64) << Self::NODE_SHIFT) | offset.into_u64())
    }

    pub const fn node(self) -> NodeId {
        NodeId::new((self.0 >> Self::NODE_SHIFT) as u16)
    }

    pub const fn offset(self) -> Offset {
        Offset::from_u64_truncating(self.0)
    }

    pub const fn into_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<Address> for u64 {
    fn from(value: Address) -> Self {
        value.into_u64()
    }
}

/// Bus topology generation
///
/// Bumped on every bus reset. Work stamped with an older generation is stale.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Generation(u32);

impl Generation {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn into_u32(self) -> u32 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl From<u32> for Generation {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Generation> for u32 {
    fn from(value: Generation) -> Self {
        value.into_u32()
    }
}

/// Local node address and number of nodes on the bus after the last reset
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Topology {
    pub node_id: NodeId,
    pub node_count: u16,
}

impl Topology {
    /// Packs the topology as `(node_id << 16) | node_count`
    pub const fn into_u32(self) -> u32 {
        ((self.node_id.into_u16() as u32) << 16) | self.node_count as u32
    }

    pub const fn from_u32(value: u32) -> Self {
        Self {
            node_id: NodeId::new((value >> 16) as u16),
            node_count: value as u16,
        }
    }
}

/// Isochronous channel number [0; 63]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Channel(u8);

impl Channel {
    const MAX_VALUE: u8 = 63;
    pub const MIN: Channel = Channel(0);
    pub const MAX: Channel = Channel(Self::MAX_VALUE);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_u8_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<Channel> for u8 {
    fn from(value: Channel) -> Self {
        value.into_u8()
    }
}

impl From<Channel> for usize {
    fn from(value: Channel) -> Self {
        u8::from(value).into()
    }
}

impl TryFrom<u8> for Channel {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// A set of isochronous channels
///
/// Bit `c` is set when channel `c` belongs to the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelSet(u64);

impl ChannelSet {
    pub const NONE: Self = Self(0);
    pub const fn into_bits(self) -> u64 {
        self.0
    }

    pub const fn new_eq(channel: Channel) -> Self {
        Self(1u64 << channel.into_u8())
    }

    pub const fn contains(&self, channel: Channel) -> bool {
        (self.0 >> channel.into_u8()) & 0x1 != 0
    }

    pub const fn insert(&mut self, channel: Channel) {
        self.0 |= Self::new_eq(channel).0
    }

    pub const fn remove(&mut self, channel: Channel) {
        self.0 &= !Self::new_eq(channel).0
    }

    pub const fn first(&self) -> Option<Channel> {
        Channel::new(self.0.trailing_zeros() as u8)
    }

    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == Self::NONE.0
    }
}

impl core::iter::IntoIterator for ChannelSet {
    type Item = Channel;
    type IntoIter = ChannelSetIterator;
    fn into_iter(self) -> Self::IntoIter {
        ChannelSetIterator { residual: self }
    }
}

pub struct ChannelSetIterator {
    residual: ChannelSet,
}

impl core::iter::Iterator for ChannelSetIterator {
    type Item = Channel;
    fn next(&mut self) -> Option<Self::Item> {
        let first = self.residual.first();
        if let Some(channel) = first {
            self.residual.remove(channel);
        }
        first
    }
}

/// Transaction label correlating a request with its split response
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Label(u8);

impl Label {
    const MAX_VALUE: u8 = 0x3f;
    pub const MAX: Label = Label(Self::MAX_VALUE);
    pub const COUNT: usize = Self::MAX_VALUE as usize + 1;

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_u8_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }

    pub fn next(self) -> Self {
        Self((self.0 + 1) & Self::MAX.0)
    }
}

impl Default for Label {
    fn default() -> Self {
        Label(0)
    }
}

impl From<Label> for u8 {
    fn from(value: Label) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for Label {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Registry-assigned identifier of an attached bus controller
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HostId(u32);

impl HostId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn into_u32(self) -> u32 {
        self.0
    }
}

/// Extended transaction code of a lock request
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ExtendedCode {
    MaskSwap = 1,
    CompareSwap = 2,
    FetchAdd = 3,
    LittleAdd = 4,
    BoundedAdd = 5,
    WrapAdd = 6,
}

impl ExtendedCode {
    pub const fn try_from_u32(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::MaskSwap),
            2 => Some(Self::CompareSwap),
            3 => Some(Self::FetchAdd),
            4 => Some(Self::LittleAdd),
            5 => Some(Self::BoundedAdd),
            6 => Some(Self::WrapAdd),
            _ => None,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }

    /// Request payload length in bytes
    ///
    /// The add operations carry a single data quadlet, the others an argument and a data quadlet.
    pub const fn payload_len(self) -> usize {
        match self {
            Self::FetchAdd | Self::LittleAdd => QUADLET_SIZE,
            Self::MaskSwap | Self::CompareSwap | Self::BoundedAdd | Self::WrapAdd => {
                2 * QUADLET_SIZE
            }
        }
    }

    /// Applies the operation to the old value and returns the new one, or `None` if the
    /// stored value must stay unchanged.
    pub fn apply(self, old: u32, arg: u32, data: u32) -> Option<u32> {
        match self {
            Self::MaskSwap => Some((data & arg) | (old & !arg)),
            Self::CompareSwap => (old == arg).then_some(data),
            Self::FetchAdd => Some(old.wrapping_add(data)),
            Self::LittleAdd => {
                let sum = old.swap_bytes().wrapping_add(data.swap_bytes());
                Some(sum.swap_bytes())
            }
            Self::BoundedAdd => (old != arg).then_some(old.wrapping_add(data)),
            Self::WrapAdd => Some(if old != arg { old.wrapping_add(data) } else { data }),
        }
    }
}

impl TryFrom<u32> for ExtendedCode {
    type Error = InvalidValue;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::try_from_u32(value).ok_or(InvalidValue)
    }
}

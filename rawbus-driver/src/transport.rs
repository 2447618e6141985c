//! Bus controller interface consumed by the engine

use rawbus_core::{Channel, ExtendedCode, Label, NodeId, Offset, Topology};

use crate::OutOfMemory;
use crate::packet::{Packet, PacketKind, ResponseCode};

/// A bus controller
///
/// Local operations serve the address space of the controller's own node. They run in the
/// caller's context and should not block.
pub trait Transport: Send + Sync {
    /// Human-readable controller name reported by host enumeration
    fn name(&self) -> &str;

    /// Current local node id and node count
    fn topology(&self) -> Topology;

    /// Builds a request packet with a zeroed payload
    fn build_packet(
        &self,
        kind: PacketKind,
        destination: NodeId,
        offset: Offset,
        label: Label,
    ) -> Result<Packet, OutOfMemory> {
        Packet::new(kind, destination, offset, label)
    }

    /// Queues the packet for transmission
    ///
    /// Returns `false` if the packet was rejected. The completion of a rejected packet must
    /// not fire; the engine reports the failure itself.
    fn send(&self, packet: Packet) -> bool;

    fn read(&self, offset: Offset, buffer: &mut [u8]) -> ResponseCode;
    fn write(&self, offset: Offset, data: &[u8]) -> ResponseCode;

    /// Executes a lock operation on the quadlet at the offset and returns the old value
    fn lock(
        &self,
        offset: Offset,
        code: ExtendedCode,
        arg: u32,
        data: u32,
    ) -> Result<u32, ResponseCode>;

    /// Starts delivering the isochronous channel
    fn listen(&self, channel: Channel);
    fn unlisten(&self, channel: Channel);
}

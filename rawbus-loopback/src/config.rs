use rawbus_core::NodeId;

/// Simulated bus controller description
///
/// The simulated bus holds `node_count` nodes on the bus of `node_id`, physical ids starting
/// at zero. Every node exposes `memory_size` bytes of address space starting at offset zero.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub name: &'static str,
    pub node_id: NodeId,
    pub node_count: u16,
    pub memory_size: usize,
    /// Reject every packet handed to `send`
    pub reject_sends: bool,
    /// Fail every packet allocation
    pub fail_allocation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "loopback",
            node_id: NodeId::new(0),
            node_count: 2,
            memory_size: 1024,
            reject_sends: false,
            fail_allocation: false,
        }
    }
}

//! Access to the memory of the client owning a session
//!
//! Requests refer to payload and result buffers by client addresses. The engine copies data
//! through this interface only, so a client may live in another address space.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fault;

pub trait ClientMemory {
    /// Fills the buffer with client memory starting at the address
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), Fault>;

    /// Stores the data to client memory starting at the address
    fn write(&self, address: u64, data: &[u8]) -> Result<(), Fault>;
}

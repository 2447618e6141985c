/// Private interfaces for the rawbus engine
///
/// Drivers should not use this module.
/// Backward-incompatible changes can be made without major version bump.
use rawbus_core::{Channel, HostId, Topology};

use crate::packet::Response;

pub trait DynamicCompletion {
    /// Reports the outcome of the request with the given engine-assigned identifier
    fn complete(&self, request: u64, response: Response<'_>);
}

pub trait DynamicEvents {
    fn bus_reset(&self, host: HostId, topology: Topology);
    fn iso_receive(&self, host: HostId, channel: Channel, data: &[u8]);
}

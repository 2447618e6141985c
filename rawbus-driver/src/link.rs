//! Handles connecting a driver and the rawbus engine

use alloc::sync::Arc;
use rawbus_core::{Channel, HostId, Topology};

use crate::internal;
use crate::packet::Response;

/// One-shot completion token of a sent request
///
/// The engine attaches a token to each packet it sends. A driver fires it once the response
/// arrives or the transaction fails. Dropping the token of an accepted packet leaves the request
/// outstanding forever and blocks the owning session's close.
pub struct Completion {
    sink: Arc<dyn internal::DynamicCompletion + Send + Sync>,
    request: u64,
}

impl Completion {
    pub fn new(sink: Arc<dyn internal::DynamicCompletion + Send + Sync>, request: u64) -> Self {
        Self { sink, request }
    }

    /// Delivers the response to the owner of the request
    pub fn complete(self, response: Response<'_>) {
        self.sink.complete(self.request, response);
    }
}

impl core::fmt::Debug for Completion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completion")
            .field("request", &self.request)
            .finish()
    }
}

/// Event channel of an attached bus controller. A driver should keep it.
///
/// Events may be reported from any execution context.
#[derive(Clone, Copy)]
pub struct Link<'a> {
    events: &'a (dyn internal::DynamicEvents + Sync),
    host: HostId,
}

impl<'a> Link<'a> {
    pub fn new(events: &'a (dyn internal::DynamicEvents + Sync), host: HostId) -> Self {
        Self { events, host }
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    /// Reports a completed bus reset together with the new local topology.
    ///
    /// Bumps the host generation and notifies every bound session.
    pub fn bus_reset(&self, topology: Topology) {
        self.events.bus_reset(self.host, topology);
    }

    /// Delivers an inbound isochronous packet to every session listening on the channel
    pub fn iso_receive(&self, channel: Channel, data: &[u8]) {
        self.events.iso_receive(self.host, channel, data);
    }
}

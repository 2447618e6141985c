//! Completion path of remote transactions

use alloc::sync::Arc;
use core::cell::Cell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use rawbus_core::{Channel, ChannelSet};
use rawbus_driver::internal::DynamicCompletion;
use rawbus_driver::packet::Response;

use crate::format::ErrorCode;
use crate::registry::Host;
use crate::request::{Payload, PendingRequest};
use crate::session::queues::Shared;

/// Binding of a connected session to its host
///
/// Completion tokens of sent packets refer to it, so it outlives the session while
/// transactions are outstanding. It also tracks the channels the transport listens to on
/// behalf of the session, which outlive a detach of the host.
pub(crate) struct Connection<M: RawMutex> {
    session: Arc<Shared<M>>,
    host: Arc<Host<M>>,
    channels: Mutex<M, Cell<ChannelSet>>,
}

impl<M: RawMutex> Connection<M> {
    pub fn new(session: Arc<Shared<M>>, host: Arc<Host<M>>) -> Self {
        Self {
            session,
            host,
            channels: Mutex::new(Cell::new(ChannelSet::NONE)),
        }
    }

    pub fn session(&self) -> &Arc<Shared<M>> {
        &self.session
    }

    pub fn host(&self) -> &Arc<Host<M>> {
        &self.host
    }

    pub fn listened(&self, channel: Channel) {
        self.channels.lock(|channels| {
            let mut set = channels.get();
            set.insert(channel);
            channels.set(set);
        });
    }

    pub fn unlistened(&self, channel: Channel) {
        self.channels.lock(|channels| {
            let mut set = channels.get();
            set.remove(channel);
            channels.set(set);
        });
    }

    /// Clears the listened channels and returns them
    pub fn take_channels(&self) -> ChannelSet {
        self.channels.lock(|channels| channels.take())
    }

    /// Applies the outcome, releases the transaction label and moves the request to the
    /// completed queue. Returns false if the request is not pending.
    pub fn finish(&self, id: u64, outcome: impl FnOnce(&mut PendingRequest)) -> bool {
        self.session.finish(id, |request| {
            outcome(request);
            if let Some((node, label)) = request.label.take() {
                self.host.release_label(node, label);
            }
        })
    }
}

fn apply_response(request: &mut PendingRequest, response: &Response<'_>) {
    if !response.is_success() {
        request.fail(ErrorCode::from_response(response.ack, response.rcode));
        return;
    }

    // Short responses leave the tail zeroed
    if let Payload::Owned(buffer) = &mut request.payload {
        let length = buffer.len().min(response.data.len());
        buffer[..length].copy_from_slice(&response.data[..length]);
    }
}

impl<M: RawMutex + Send + Sync> DynamicCompletion for Connection<M> {
    fn complete(&self, id: u64, response: Response<'_>) {
        let live = self.host.generation();
        let found = self.finish(id, |request| {
            if request.generation != live {
                debug!(
                    "request {}: generation changed {} -> {}",
                    id,
                    request.generation.into_u32(),
                    live.into_u32()
                );
                request.generation = live;
                request.fail(ErrorCode::GenerationChanged);
            } else {
                apply_response(request, &response);
            }
        });

        if !found {
            warn!("completion of unknown request {}", id);
        }
    }
}

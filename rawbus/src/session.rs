//! Client session handle

use alloc::sync::Arc;
use core::future::poll_fn;
use core::task::{Context, Poll};
use embassy_sync::blocking_mutex::raw::RawMutex;
use rawbus_core::Label;

use crate::client::ClientMemory;
use crate::completion::Connection;
use crate::config::GenerationCheck;
use crate::dispatch::{self, Dispatch, RemoteRequest};
use crate::format::{ErrorCode, HostListEntry, PROTOCOL_VERSION, RequestKind, RequestRecord};
use crate::registry::{BindError, Registry};
use crate::request::{Payload, PendingRequest};
use crate::{ConsumeError, SubmitError};

pub(crate) mod queues;

use queues::Shared;

/// Protocol state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// Waiting for a handshake
    Opened,
    /// Handshake done, waiting for a host binding
    Initialized,
    /// Bound to a host
    Connected,
}

enum State<M: RawMutex> {
    Opened,
    Initialized,
    Connected(Arc<Connection<M>>),
    Closed,
}

/// A client's view of the bus
///
/// Clients submit fixed-size request records and consume reply records. Every accepted
/// submission produces exactly one reply. Replies are consumed in completion order, which
/// may differ from submission order.
///
/// Dropping the session without [`Session::close`] releases everything except requests still
/// in flight. Those are released once the transport completes them.
pub struct Session<'a, M: RawMutex + Send + Sync + 'static> {
    registry: &'a Registry<M>,
    memory: &'a (dyn ClientMemory + Sync),
    shared: Arc<Shared<M>>,
    state: State<M>,
}

impl<'a, M: RawMutex + Send + Sync + 'static> Session<'a, M> {
    pub fn open(registry: &'a Registry<M>, memory: &'a (dyn ClientMemory + Sync)) -> Self {
        let shared = Arc::new(Shared::new(registry.next_session_id()));
        debug!("session {} opened", shared.id());
        Self {
            registry,
            memory,
            shared,
            state: State::Opened,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            State::Opened => SessionState::Opened,
            State::Initialized => SessionState::Initialized,
            State::Connected(_) => SessionState::Connected,
            // Only set while the session is consumed by `close` or `drop`
            State::Closed => unreachable!(),
        }
    }

    /// Submits a request record. Returns the number of bytes consumed.
    ///
    /// Waits for a free transaction label if the target node has too many outstanding
    /// transactions. Safe to drop: a dropped submission produces no reply.
    pub async fn submit(&mut self, bytes: &[u8]) -> Result<usize, SubmitError> {
        let Some(remote) = self.process(bytes)? else {
            return Ok(RequestRecord::SIZE);
        };
        let connection = connection(&self.state).clone();
        let label = poll_fn(|cx| connection.host().poll_acquire_label(remote.node, cx)).await;
        self.send(remote, label)
    }

    /// Submits a request record without waiting
    ///
    /// Fails with [`SubmitError::WouldBlock`] instead of waiting for a transaction label.
    /// The request is discarded in that case.
    pub fn try_submit(&mut self, bytes: &[u8]) -> Result<usize, SubmitError> {
        let Some(remote) = self.process(bytes)? else {
            return Ok(RequestRecord::SIZE);
        };
        let label = connection(&self.state)
            .host()
            .try_acquire_label(remote.node)
            .ok_or(SubmitError::WouldBlock)?;
        self.send(remote, label)
    }

    /// Waits for the next reply
    pub async fn consume(&mut self) -> [u8; RequestRecord::SIZE] {
        let request = poll_fn(|cx| self.shared.poll_pop_completed(cx)).await;
        request.into_reply(self.memory)
    }

    pub fn try_consume(&mut self) -> Result<[u8; RequestRecord::SIZE], ConsumeError> {
        let request = self.shared.pop_completed().ok_or(ConsumeError::WouldBlock)?;
        Ok(request.into_reply(self.memory))
    }

    pub fn is_readable(&self) -> bool {
        self.shared.is_readable()
    }

    pub fn poll_readable(&self, cx: &mut Context<'_>) -> Poll<()> {
        self.shared.poll_readable(cx)
    }

    pub async fn wait_readable(&self) {
        poll_fn(|cx| self.shared.poll_readable(cx)).await
    }

    /// Number of submitted transactions waiting for completion
    pub fn pending(&self) -> usize {
        self.shared.pending_len()
    }

    /// Closes the session
    ///
    /// Unsubscribes all channels, then waits until every outstanding transaction completes,
    /// releasing replies as they arrive.
    pub async fn close(mut self) {
        self.unlisten_all();
        poll_fn(|cx| self.shared.poll_drained(cx)).await;
        self.release();
    }

    fn decode(&self, bytes: &[u8]) -> Result<PendingRequest, SubmitError> {
        let bytes: &[u8; RequestRecord::SIZE] =
            bytes.try_into().map_err(|_| SubmitError::InvalidLength)?;
        let record = RequestRecord::from_bytes(bytes);
        Ok(PendingRequest::new(self.shared.next_request_id(), record))
    }

    /// Runs the state machine. Returns a remote request that still needs a label.
    fn process(&mut self, bytes: &[u8]) -> Result<Option<RemoteRequest>, SubmitError> {
        let request = self.decode(bytes)?;
        let dispatch = match self.state() {
            SessionState::Opened => Dispatch::Completed(self.opened(request)),
            SessionState::Initialized => Dispatch::Completed(self.initialized(request)?),
            SessionState::Connected => {
                let connection = connection(&self.state);
                dispatch::connected(self.registry, connection, self.memory, request)?
            }
        };

        match dispatch {
            Dispatch::Completed(request) => {
                self.shared.push_completed(request);
                Ok(None)
            }
            Dispatch::Remote(remote) => Ok(Some(remote)),
        }
    }

    fn send(&self, remote: RemoteRequest, label: Label) -> Result<usize, SubmitError> {
        let connection = connection(&self.state);
        if let Some(request) = dispatch::send(connection, self.memory, remote, label)? {
            self.shared.push_completed(request);
        }
        Ok(RequestRecord::SIZE)
    }

    fn opened(&mut self, mut request: PendingRequest) -> PendingRequest {
        request.length = 0;
        match request.record.request_kind() {
            Some(RequestKind::Handshake) if request.record.misc == PROTOCOL_VERSION => {
                debug!("session {}: initialized", self.shared.id());
                self.state = State::Initialized;
            }
            Some(RequestKind::Handshake) => {
                debug!(
                    "session {}: protocol version {} rejected",
                    self.shared.id(),
                    request.record.misc
                );
                request.error = ErrorCode::ProtocolVersionMismatch;
                request.misc = PROTOCOL_VERSION;
            }
            _ => request.error = ErrorCode::OutOfOrderRequest,
        }
        request
    }

    fn initialized(&mut self, mut request: PendingRequest) -> Result<PendingRequest, SubmitError> {
        let check = self.registry.config().generation_check;
        let kind = request.record.request_kind();
        if check == GenerationCheck::Initialized && kind != Some(RequestKind::BindHost) {
            if let Err(live) = self.registry.check_generation(request.generation) {
                debug!(
                    "session {}: generation changed {} -> {}",
                    self.shared.id(),
                    request.generation.into_u32(),
                    live.into_u32()
                );
                request.generation = live;
                request.fail(ErrorCode::GenerationChanged);
                return Ok(request);
            }
        }

        match kind {
            Some(RequestKind::ListHosts) => {
                let hosts = self
                    .registry
                    .list_hosts()
                    .map_err(|_| SubmitError::OutOfMemory)?;
                let mut payload = dispatch::allocate(hosts.len() * HostListEntry::SIZE)?;
                for (chunk, entry) in payload
                    .chunks_exact_mut(HostListEntry::SIZE)
                    .zip(hosts.iter())
                {
                    chunk.copy_from_slice(&entry.to_bytes());
                }

                request.misc = hosts.len() as u32;
                request.length = request.length.min(payload.len() as u32);
                request.payload = Payload::Owned(payload);
            }
            Some(RequestKind::BindHost) => {
                request.length = 0;
                let expected = match check {
                    GenerationCheck::Initialized | GenerationCheck::BindHost => {
                        Some(request.generation)
                    }
                    GenerationCheck::Connected => None,
                };

                match self.registry.bind(request.record.misc, &self.shared, expected) {
                    Ok(host) => {
                        let (generation, topology) = host.snapshot();
                        debug!(
                            "session {}: bound to host {}",
                            self.shared.id(),
                            host.id().into_u32()
                        );
                        request.generation = generation;
                        request.misc = topology.into_u32();
                        self.state =
                            State::Connected(Arc::new(Connection::new(self.shared.clone(), host)));
                    }
                    Err(BindError::NoSuchHost) => request.error = ErrorCode::InvalidArgument,
                    Err(BindError::GenerationChanged(live)) => {
                        request.generation = live;
                        request.error = ErrorCode::GenerationChanged;
                    }
                    Err(BindError::OutOfMemory) => return Err(SubmitError::OutOfMemory),
                }
            }
            _ => request.fail(ErrorCode::OutOfOrderRequest),
        }
        Ok(request)
    }

    /// Drops every channel subscription of a connected session
    ///
    /// The transport stops listening even if the host was detached meanwhile.
    fn unlisten_all(&mut self) {
        if let State::Connected(connection) = &self.state {
            let host = connection.host();
            self.registry.unsubscribe_all(host.id(), self.shared.id());
            for channel in connection.take_channels() {
                host.transport().unlisten(channel);
            }
        }
    }

    /// Stops queueing replies and unbinds from the host
    fn release(&mut self) {
        self.shared.shut();
        if let State::Connected(connection) = &self.state {
            let host = connection.host();
            self.registry.unbind(host.id(), self.shared.id());
            host.release_usage();
        }
        debug!("session {} closed", self.shared.id());
        self.state = State::Closed;
    }
}

impl<'a, M: RawMutex + Send + Sync + 'static> Drop for Session<'a, M> {
    fn drop(&mut self) {
        if !matches!(self.state, State::Closed) {
            self.unlisten_all();
            self.release();
        }
    }
}

/// Connection of a session in the connected state
fn connection<M: RawMutex>(state: &State<M>) -> &Arc<Connection<M>> {
    match state {
        State::Connected(connection) => connection,
        _ => unreachable!(),
    }
}

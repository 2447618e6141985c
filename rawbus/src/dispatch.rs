//! Request processing of connected sessions
//!
//! Requests to the host's own node run in place against the transport's local address space.
//! Other requests become packets that complete asynchronously.

use alloc::sync::Arc;
use alloc::vec::Vec;
use embassy_sync::blocking_mutex::raw::RawMutex;
use rawbus_core::{Address, Channel, ExtendedCode, Label, NodeId, Offset, QUADLET_SIZE};
use rawbus_driver::internal::DynamicCompletion;
use rawbus_driver::link::Completion;
use rawbus_driver::packet::{PacketKind, lock_operands};

use crate::SubmitError;
use crate::client::ClientMemory;
use crate::completion::Connection;
use crate::format::{ErrorCode, RequestKind};
use crate::registry::{IsoBuffer, Registry};
use crate::request::{Payload, PendingRequest};

/// Remote transaction waiting for a transaction label
pub(crate) struct RemoteRequest {
    pub request: PendingRequest,
    pub kind: PacketKind,
    pub node: NodeId,
    pub offset: Offset,
}

pub(crate) enum Dispatch {
    /// Finished request to be queued as completed
    Completed(PendingRequest),
    Remote(RemoteRequest),
}

pub(crate) fn allocate(length: usize) -> Result<Vec<u8>, SubmitError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(length)
        .map_err(|_| SubmitError::OutOfMemory)?;
    buffer.resize(length, 0);
    Ok(buffer)
}

fn failed(mut request: PendingRequest, error: ErrorCode) -> Result<Dispatch, SubmitError> {
    debug!("request {}: rejected with {}", request.id, error.into_u32());
    request.fail(error);
    Ok(Dispatch::Completed(request))
}

pub(crate) fn connected<M: RawMutex + Send + Sync>(
    registry: &Registry<M>,
    connection: &Connection<M>,
    memory: &dyn ClientMemory,
    mut request: PendingRequest,
) -> Result<Dispatch, SubmitError> {
    let host = connection.host();
    if host.is_detached() {
        return failed(request, ErrorCode::Aborted);
    }

    let (generation, topology) = host.snapshot();
    if request.generation != generation {
        request.generation = generation;
        return failed(request, ErrorCode::GenerationChanged);
    }

    match request.record.request_kind() {
        Some(RequestKind::IsoListen) => return Ok(iso_listen(registry, connection, request)),
        Some(RequestKind::AsyncRead | RequestKind::AsyncWrite | RequestKind::Lock) => {}
        _ => return failed(request, ErrorCode::OutOfOrderRequest),
    }

    if request.record.length == 0 {
        return failed(request, ErrorCode::InvalidArgument);
    }

    let address = Address::new(request.record.address);
    if address.node() == topology.node_id {
        local(connection, memory, request, address.offset())
    } else {
        remote(request, address)
    }
}

/// Positive channel numbers subscribe, one's complements unsubscribe
fn iso_listen<M: RawMutex + Send + Sync>(
    registry: &Registry<M>,
    connection: &Connection<M>,
    mut request: PendingRequest,
) -> Dispatch {
    let host = connection.host();
    let session = connection.session().id();
    let value = request.record.misc as i32;
    request.length = 0;

    let result = match value {
        0..=63 => {
            let channel = Channel::from_u8_truncating(value as u8);
            let iso_buffer = IsoBuffer {
                address: request.record.recv_buffer,
                length: request.record.length,
            };
            registry
                .subscribe(host.id(), session, channel, iso_buffer)
                .map(|_| {
                    connection.listened(channel);
                    host.transport().listen(channel)
                })
        }
        -64..=-1 => {
            let channel = Channel::from_u8_truncating(!value as u8);
            registry
                .unsubscribe(host.id(), session, channel)
                .map(|_| {
                    connection.unlistened(channel);
                    host.transport().unlisten(channel)
                })
        }
        _ => Err(ErrorCode::InvalidArgument),
    };

    if let Err(error) = result {
        debug!("request {}: listen {} rejected", request.id, value);
        request.error = error;
    }
    Dispatch::Completed(request)
}

fn lock_code(request: &PendingRequest) -> Result<ExtendedCode, ErrorCode> {
    let code = ExtendedCode::try_from_u32(request.record.misc).ok_or(ErrorCode::InvalidArgument)?;
    if request.record.length as usize != code.payload_len() {
        return Err(ErrorCode::InvalidArgument);
    }
    Ok(code)
}

fn local<M: RawMutex>(
    connection: &Connection<M>,
    memory: &dyn ClientMemory,
    mut request: PendingRequest,
    offset: Offset,
) -> Result<Dispatch, SubmitError> {
    let transport = connection.host().transport();
    let length = request.record.length as usize;

    match request.record.request_kind() {
        Some(RequestKind::AsyncRead) => {
            let mut buffer = allocate(length)?;
            let rcode = transport.read(offset, &mut buffer);
            request.error = ErrorCode::from_local(rcode);
            request.payload = Payload::Owned(buffer);
        }
        Some(RequestKind::AsyncWrite) => {
            let mut buffer = allocate(length)?;
            if memory.read(request.record.send_buffer, &mut buffer).is_err() {
                return failed(request, ErrorCode::PayloadFault);
            }
            let rcode = transport.write(offset, &buffer);
            request.error = ErrorCode::from_local(rcode);
            request.length = 0;
        }
        Some(RequestKind::Lock) => {
            let code = match lock_code(&request) {
                Ok(code) => code,
                Err(error) => return failed(request, error),
            };
            let mut payload = [0; 2 * QUADLET_SIZE];
            let payload = &mut payload[..length];
            if memory.read(request.record.send_buffer, payload).is_err() {
                return failed(request, ErrorCode::PayloadFault);
            }

            let (arg, data) = unwrap!(lock_operands(payload));
            match transport.lock(offset, code, arg, data) {
                Ok(old) => {
                    let mut buffer = allocate(QUADLET_SIZE)?;
                    buffer.copy_from_slice(&old.to_be_bytes());
                    request.payload = Payload::Owned(buffer);
                    request.length = QUADLET_SIZE as u32;
                }
                Err(rcode) => request.error = ErrorCode::from_local(rcode),
            }
        }
        _ => return failed(request, ErrorCode::OutOfOrderRequest),
    }

    if !request.error.is_success() {
        request.length = 0;
    }
    Ok(Dispatch::Completed(request))
}

fn remote(mut request: PendingRequest, address: Address) -> Result<Dispatch, SubmitError> {
    let length = request.record.length as usize;
    let tidy = length % QUADLET_SIZE == 0;

    let kind = match request.record.request_kind() {
        Some(RequestKind::AsyncRead) if tidy => {
            request.payload = Payload::Owned(allocate(length)?);
            if length == QUADLET_SIZE {
                PacketKind::ReadQuadlet
            } else {
                PacketKind::ReadBlock { length }
            }
        }
        Some(RequestKind::AsyncWrite) if tidy => {
            request.length = 0;
            if length == QUADLET_SIZE {
                PacketKind::WriteQuadlet
            } else {
                PacketKind::WriteBlock { length }
            }
        }
        Some(RequestKind::AsyncRead | RequestKind::AsyncWrite) => {
            return failed(request, ErrorCode::UntidyLength);
        }
        Some(RequestKind::Lock) => {
            let code = match lock_code(&request) {
                Ok(code) => code,
                Err(error) => return failed(request, error),
            };
            request.payload = Payload::Owned(allocate(QUADLET_SIZE)?);
            request.length = QUADLET_SIZE as u32;
            PacketKind::Lock { code }
        }
        _ => return failed(request, ErrorCode::OutOfOrderRequest),
    };

    Ok(Dispatch::Remote(RemoteRequest {
        request,
        kind,
        node: address.node(),
        offset: address.offset(),
    }))
}

/// Builds and sends the packet of a remote request holding a transaction label
///
/// The request is pending before the packet leaves, so a completion may arrive at any time
/// after `send` is called. A rejected packet completes the request with a send error.
pub(crate) fn send<M: RawMutex + Send + Sync + 'static>(
    connection: &Arc<Connection<M>>,
    memory: &dyn ClientMemory,
    remote: RemoteRequest,
    label: Label,
) -> Result<Option<PendingRequest>, SubmitError> {
    let RemoteRequest {
        mut request,
        kind,
        node,
        offset,
    } = remote;
    let host = connection.host();
    let transport = host.transport();

    let mut packet = match transport.build_packet(kind, node, offset, label) {
        Ok(packet) => packet,
        Err(_) => {
            warn!("request {}: packet allocation failed", request.id);
            host.release_label(node, label);
            return Err(SubmitError::OutOfMemory);
        }
    };

    if kind.payload_len() > 0
        && memory
            .read(request.record.send_buffer, packet.payload_mut())
            .is_err()
    {
        host.release_label(node, label);
        request.fail(ErrorCode::PayloadFault);
        return Ok(Some(request));
    }

    let id = request.id;
    request.label = Some((node, label));
    let sink: Arc<dyn DynamicCompletion + Send + Sync> = connection.clone();
    packet.set_completion(Completion::new(sink, id));
    connection.session().push_pending(request);

    trace!(
        "request {}: sending to node {:x}, label {}",
        id,
        node.into_u16(),
        label.into_u8()
    );
    if !transport.send(packet) {
        debug!("request {}: send rejected", id);
        connection.finish(id, |request| request.fail(ErrorCode::SendError));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;

    #[test]
    fn test_allocate_zeroed() {
        assert_eq!(allocate(3).unwrap(), std::vec![0, 0, 0]);
        assert!(allocate(0).unwrap().is_empty());
    }
}

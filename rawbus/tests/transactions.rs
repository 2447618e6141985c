use core::pin::pin;
use core::task::{Context, Poll};
use rawbus::ConsumeError;
use rawbus::SubmitError;
use rawbus::config::Config;
use rawbus::core::{ExtendedCode, NodeId, Offset, Topology};
use rawbus::format::{ErrorCode, RequestKind, RequestRecord};
use rawbus::packet::{Ack, Response, ResponseCode};
use futures_test::task::new_count_waker;
use std::collections::BTreeSet;

mod common;

use common::*;

fn offset(value: u64) -> Offset {
    Offset::new(value).unwrap()
}

#[test]
fn test_remote_read() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    let request = RequestRecord {
        address: 1 << 48,
        tag: 77,
        ..read(REMOTE_NODE, 0, 4)
    };
    submit(&mut session, request);
    assert_eq!(session.pending(), 1);
    assert_eq!(session.try_consume(), Err(ConsumeError::WouldBlock));
    assert_eq!(bench.registry.labels_in_use(HOST, REMOTE_NODE), Some(1));

    let mut packet = bench.loopback.pop_sent().unwrap();
    assert_eq!(packet.destination, REMOTE_NODE);
    assert_eq!(packet.offset, offset(0));
    packet.take_completion().unwrap().complete(Response {
        ack: Ack::Complete,
        rcode: ResponseCode::Complete,
        data: &[0xde, 0xad, 0xbe, 0xef],
    });

    assert_eq!(session.pending(), 0);
    assert!(session.is_readable());
    let reply = next_reply(&mut session);
    assert_eq!(reply.error_code(), ErrorCode::Success);
    assert_eq!(reply.length, 4);
    assert_eq!(reply.tag, 77);
    assert_eq!(memory.load(Arena::RECV, 4), [0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(bench.registry.labels_in_use(HOST, REMOTE_NODE), Some(0));
}

#[test]
fn test_remote_block_transfer() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    let data: std::vec::Vec<u8> = (0..16).collect();
    memory.store(Arena::SEND, &data);
    submit(&mut session, write(REMOTE_NODE, 0x40, 16));
    submit(&mut session, read(REMOTE_NODE, 0x40, 16));
    assert_eq!(bench.loopback.service(), 2);

    let written = next_reply(&mut session);
    assert_eq!(written.kind, RequestKind::AsyncWrite.into_u32());
    assert_eq!(written.error_code(), ErrorCode::Success);
    assert_eq!(written.length, 0);

    let read = next_reply(&mut session);
    assert_eq!(read.error_code(), ErrorCode::Success);
    assert_eq!(read.length, 16);
    assert_eq!(memory.load(Arena::RECV, 16), data);
}

#[test]
fn test_remote_lock() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);
    bench.loopback.poke(REMOTE_NODE, offset(8), &[0, 0, 0, 5]);

    memory.store(Arena::SEND, &[0, 0, 0, 5, 0, 0, 0, 9]);
    let code = ExtendedCode::CompareSwap.into_u8().into();
    submit(&mut session, lock(REMOTE_NODE, 8, code, 8));
    bench.loopback.service();

    let reply = next_reply(&mut session);
    assert_eq!(reply.error_code(), ErrorCode::Success);
    assert_eq!(reply.length, 4);
    assert_eq!(memory.load(Arena::RECV, 4), [0, 0, 0, 5]);

    let mut value = [0; 4];
    bench.loopback.peek(REMOTE_NODE, offset(8), &mut value);
    assert_eq!(value, [0, 0, 0, 9]);
}

#[test]
fn test_lock_length() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    let fetch_add = ExtendedCode::FetchAdd.into_u8().into();
    let reply = roundtrip(&mut session, lock(REMOTE_NODE, 0, fetch_add, 8));
    assert_eq!(reply.error_code(), ErrorCode::InvalidArgument);

    let mask_swap = ExtendedCode::MaskSwap.into_u8().into();
    let reply = roundtrip(&mut session, lock(LOCAL_NODE, 0, mask_swap, 4));
    assert_eq!(reply.error_code(), ErrorCode::InvalidArgument);

    let reply = roundtrip(&mut session, lock(REMOTE_NODE, 0, 7, 8));
    assert_eq!(reply.error_code(), ErrorCode::InvalidArgument);
    assert_eq!(bench.loopback.sent_len(), 0);
}

#[test]
fn test_remote_failures() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    // Out of the simulated address space
    submit(&mut session, read(REMOTE_NODE, 0x1_0000, 4));
    // Absent node
    submit(&mut session, read(NodeId::new(7), 0, 4));
    bench.loopback.service();

    let reply = next_reply(&mut session);
    assert_eq!(
        reply.error_code(),
        ErrorCode::Transaction {
            ack: 2,
            rcode: ResponseCode::AddressError.into_u8()
        }
    );
    assert_eq!(reply.length, 0);

    let reply = next_reply(&mut session);
    assert_eq!(reply.error_code(), ErrorCode::SendError);
    assert_eq!(reply.length, 0);
}

#[test]
fn test_transport_outcomes() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    for (ack, error) in [
        (Ack::Timeout, ErrorCode::Timeout),
        (Ack::Aborted, ErrorCode::Aborted),
        (Ack::BusyX, ErrorCode::Transaction { ack: 4, rcode: 0 }),
    ] {
        submit(&mut session, read(REMOTE_NODE, 0, 4));
        let mut packet = bench.loopback.pop_sent().unwrap();
        packet.take_completion().unwrap().complete(Response {
            ack,
            rcode: ResponseCode::Complete,
            data: &[1, 2, 3, 4],
        });

        let reply = next_reply(&mut session);
        assert_eq!(reply.error_code(), error);
        assert_eq!(reply.length, 0);
    }
}

#[test]
fn test_untidy_length() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    let reply = roundtrip(&mut session, read(REMOTE_NODE, 0, 3));
    assert_eq!(reply.error_code(), ErrorCode::UntidyLength);
    assert_eq!(reply.length, 0);
    let reply = roundtrip(&mut session, write(REMOTE_NODE, 0, 6));
    assert_eq!(reply.error_code(), ErrorCode::UntidyLength);
    assert_eq!(bench.loopback.sent_len(), 0);

    // The local node is byte addressable
    let reply = roundtrip(&mut session, read(LOCAL_NODE, 1, 3));
    assert_eq!(reply.error_code(), ErrorCode::Success);
    assert_eq!(reply.length, 3);
}

#[test]
fn test_zero_length() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    let reply = roundtrip(&mut session, read(REMOTE_NODE, 0, 0));
    assert_eq!(reply.error_code(), ErrorCode::InvalidArgument);
    assert_eq!(bench.loopback.sent_len(), 0);
}

#[test]
fn test_local_operations() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    memory.store(Arena::SEND, &[9, 8, 7, 6]);
    let reply = roundtrip(&mut session, write(LOCAL_NODE, 0x10, 4));
    assert_eq!(reply.error_code(), ErrorCode::Success);
    assert_eq!(reply.length, 0);
    assert_eq!(bench.loopback.sent_len(), 0);

    let mut value = [0; 4];
    bench.loopback.peek(LOCAL_NODE, offset(0x10), &mut value);
    assert_eq!(value, [9, 8, 7, 6]);

    let reply = roundtrip(&mut session, read(LOCAL_NODE, 0x10, 4));
    assert_eq!(reply.error_code(), ErrorCode::Success);
    assert_eq!(reply.length, 4);
    assert_eq!(memory.load(Arena::RECV, 4), [9, 8, 7, 6]);

    memory.store(Arena::SEND, &[0, 0, 0, 1]);
    let code = ExtendedCode::FetchAdd.into_u8().into();
    let reply = roundtrip(&mut session, lock(LOCAL_NODE, 0x10, code, 4));
    assert_eq!(reply.error_code(), ErrorCode::Success);
    assert_eq!(reply.length, 4);
    assert_eq!(memory.load(Arena::RECV, 4), [9, 8, 7, 6]);
    bench.loopback.peek(LOCAL_NODE, offset(0x10), &mut value);
    assert_eq!(value, [9, 8, 7, 7]);
}

#[test]
fn test_local_errors() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    let reply = roundtrip(&mut session, read(LOCAL_NODE, 0x3fe, 4));
    assert_eq!(
        reply.error_code(),
        ErrorCode::Transaction {
            ack: 1,
            rcode: ResponseCode::AddressError.into_u8()
        }
    );
    assert_eq!(reply.length, 0);

    let request = RequestRecord {
        send_buffer: Arena::SIZE as u64,
        ..write(LOCAL_NODE, 0, 4)
    };
    let reply = roundtrip(&mut session, request);
    assert_eq!(reply.error_code(), ErrorCode::PayloadFault);
    assert_eq!(reply.length, 0);
}

#[test]
fn test_payload_faults() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    let request = RequestRecord {
        send_buffer: Arena::SIZE as u64,
        ..write(REMOTE_NODE, 0, 4)
    };
    let reply = roundtrip(&mut session, request);
    assert_eq!(reply.error_code(), ErrorCode::PayloadFault);
    assert_eq!(bench.loopback.sent_len(), 0);
    assert_eq!(bench.registry.labels_in_use(HOST, REMOTE_NODE), Some(0));

    // The result cannot be stored
    let request = RequestRecord {
        recv_buffer: Arena::SIZE as u64 - 2,
        ..read(REMOTE_NODE, 0, 4)
    };
    submit(&mut session, request);
    bench.loopback.service();
    let reply = next_reply(&mut session);
    assert_eq!(reply.error_code(), ErrorCode::PayloadFault);
}

#[test]
fn test_generation_at_submission() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    let topology = Topology {
        node_id: NodeId::new(0),
        node_count: 2,
    };
    bench.loopback.bus_reset(&bench.link, topology);
    let notification = next_reply(&mut session);
    assert_eq!(notification.kind, RequestKind::BusReset.into_u32());

    for request in [read(REMOTE_NODE, 0, 4), read(LOCAL_NODE, 0, 4)] {
        let reply = roundtrip(&mut session, request);
        assert_eq!(reply.error_code(), ErrorCode::GenerationChanged);
        assert_eq!(reply.generation, 1);
        assert_eq!(reply.length, 0);
    }
    assert_eq!(bench.loopback.sent_len(), 0);

    let request = RequestRecord {
        generation: 1,
        ..read(REMOTE_NODE, 0, 4)
    };
    submit(&mut session, request);
    assert_eq!(bench.loopback.service(), 1);
    assert_eq!(next_reply(&mut session).error_code(), ErrorCode::Success);
}

#[test]
fn test_generation_at_completion() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    submit(&mut session, read(REMOTE_NODE, 0, 4));
    submit(&mut session, write(REMOTE_NODE, 0, 4));
    let topology = Topology {
        node_id: NodeId::new(0),
        node_count: 3,
    };
    bench.loopback.bus_reset(&bench.link, topology);
    assert_eq!(bench.loopback.service(), 2);

    let notification = next_reply(&mut session);
    assert_eq!(notification.kind, RequestKind::BusReset.into_u32());
    assert_eq!(notification.generation, 1);
    assert_eq!(notification.misc, 3);

    for _ in 0..2 {
        let reply = next_reply(&mut session);
        assert_eq!(reply.error_code(), ErrorCode::GenerationChanged);
        assert_eq!(reply.generation, 1);
        assert_eq!(reply.length, 0);
    }
    assert_eq!(bench.registry.labels_in_use(HOST, REMOTE_NODE), Some(0));
}

#[test]
fn test_unique_labels() {
    let mut config = Config::default();
    config.labels_per_node = 3;
    let bench = bench_with(config, Default::default());
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    for _ in 0..3 {
        submit(&mut session, read(REMOTE_NODE, 0, 4));
    }
    let bytes = read(REMOTE_NODE, 0, 4).to_bytes();
    assert_eq!(session.try_submit(&bytes), Err(SubmitError::WouldBlock));
    assert_eq!(session.pending(), 3);
    assert_eq!(bench.registry.labels_in_use(HOST, REMOTE_NODE), Some(3));

    // Other nodes have their own pool
    submit(&mut session, read(NodeId::new(2), 0, 4));
    assert_eq!(bench.loopback.sent_len(), 4);

    let mut packets = std::vec::Vec::new();
    while let Some(packet) = bench.loopback.pop_sent() {
        packets.push(packet);
    }
    let labels: BTreeSet<u8> = packets
        .iter()
        .filter(|packet| packet.destination == REMOTE_NODE)
        .map(|packet| packet.label.into_u8())
        .collect();
    assert_eq!(labels.len(), 3);

    packets[0].take_completion().unwrap().complete(Response {
        ack: Ack::Complete,
        rcode: ResponseCode::Complete,
        data: &[0; 4],
    });
    submit(&mut session, read(REMOTE_NODE, 0, 4));
    let packet = bench.loopback.pop_sent().unwrap();
    assert!(
        packets[1..]
            .iter()
            .all(|outstanding| outstanding.destination != REMOTE_NODE
                || outstanding.label != packet.label)
    );

    packets.push(packet);
    for mut packet in packets.into_iter().skip(1) {
        packet.take_completion().unwrap().complete(Response {
            ack: Ack::Complete,
            rcode: ResponseCode::Complete,
            data: &[0; 4],
        });
    }
    assert_eq!(session.pending(), 0);
    assert_eq!(bench.registry.labels_in_use(HOST, REMOTE_NODE), Some(0));
}

#[test]
fn test_submit_waits_for_label() {
    let mut config = Config::default();
    config.labels_per_node = 1;
    let bench = bench_with(config, Default::default());
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    submit(&mut session, read(REMOTE_NODE, 0, 4));
    let bytes = read(REMOTE_NODE, 4, 4).to_bytes();
    let (waker, count) = new_count_waker();
    let mut cx = Context::from_waker(&waker);
    {
        let mut submission = pin!(session.submit(&bytes));
        assert!(submission.as_mut().poll(&mut cx).is_pending());
        assert_eq!(count.get(), 0);

        assert!(bench.loopback.service_one());
        assert_eq!(count.get(), 1);
        assert_eq!(
            submission.as_mut().poll(&mut cx),
            Poll::Ready(Ok(RequestRecord::SIZE))
        );
    }

    assert_eq!(next_reply(&mut session).error_code(), ErrorCode::Success);
    assert_eq!(session.pending(), 1);
    assert_eq!(bench.loopback.sent_len(), 1);
    assert_eq!(bench.loopback.service(), 1);
    assert_eq!(next_reply(&mut session).error_code(), ErrorCode::Success);
}

#[test]
fn test_send_rejected() {
    let mut loopback = rawbus_loopback::config::Config::default();
    loopback.reject_sends = true;
    let bench = bench_with(Config::default(), loopback);
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    let reply = roundtrip(&mut session, read(REMOTE_NODE, 0, 4));
    assert_eq!(reply.error_code(), ErrorCode::SendError);
    assert_eq!(reply.length, 0);
    assert_eq!(session.pending(), 0);
    assert_eq!(bench.registry.labels_in_use(HOST, REMOTE_NODE), Some(0));

    bench.loopback.set_reject_sends(false);
    submit(&mut session, read(REMOTE_NODE, 0, 4));
    assert_eq!(session.pending(), 1);
    bench.loopback.service();
    assert_eq!(next_reply(&mut session).error_code(), ErrorCode::Success);
}

#[test]
fn test_packet_allocation_failure() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    bench.loopback.set_fail_allocation(true);
    let bytes = read(REMOTE_NODE, 0, 4).to_bytes();
    assert_eq!(session.try_submit(&bytes), Err(SubmitError::OutOfMemory));
    assert_eq!(session.try_consume(), Err(ConsumeError::WouldBlock));
    assert_eq!(session.pending(), 0);
    assert_eq!(bench.registry.labels_in_use(HOST, REMOTE_NODE), Some(0));

    // Local requests do not build packets
    let reply = roundtrip(&mut session, read(LOCAL_NODE, 0, 4));
    assert_eq!(reply.error_code(), ErrorCode::Success);
}

#[test]
fn test_detached_host() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    submit(&mut session, read(REMOTE_NODE, 0, 4));
    assert!(bench.registry.detach(HOST));
    assert!(!bench.registry.detach(HOST));
    assert_eq!(bench.registry.host_count(), 0);
    assert_eq!(bench.registry.generation(HOST), None);

    for request in [read(REMOTE_NODE, 0, 4), read(LOCAL_NODE, 0, 4)] {
        let reply = roundtrip(&mut session, request);
        assert_eq!(reply.error_code(), ErrorCode::Aborted);
        assert_eq!(reply.length, 0);
    }

    // Outstanding transactions still complete
    assert_eq!(bench.loopback.abort_all(), 1);
    assert_eq!(next_reply(&mut session).error_code(), ErrorCode::Aborted);
    futures_executor::block_on(session.close());
}

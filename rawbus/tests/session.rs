use futures_executor::{LocalPool, block_on};
use futures_task::LocalSpawn;
use rawbus::core::NodeId;
use rawbus::format::{ErrorCode, RequestKind, RequestRecord};
use rawbus::{Session, SessionState, SubmitError};
use rawbus_loopback::Loopback;
use std::boxed::Box;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

mod common;

use common::*;

#[test]
fn test_consume_waits() {
    let bench = bench();
    let memory: &'static Arena = Box::leak(Box::new(Arena::new()));
    let mut session = connect(bench.registry, memory, 0);
    submit(&mut session, read(REMOTE_NODE, 0, 4));

    let mut executor = LocalPool::new();
    let spawner = executor.spawner();
    let complete = Rc::new(AtomicBool::new(false));

    let task_complete = complete.clone();
    spawner
        .spawn_local_obj(
            Box::new(async move {
                session.wait_readable().await;
                let reply = RequestRecord::from_bytes(&session.consume().await);
                assert_eq!(reply.error_code(), ErrorCode::Success);
                assert_eq!(reply.kind, RequestKind::AsyncRead.into_u32());
                task_complete.store(true, Ordering::SeqCst);
            })
            .into(),
        )
        .unwrap();
    executor.run_until_stalled();
    assert!(!complete.load(Ordering::SeqCst));

    bench.loopback.service();
    executor.run_until_stalled();
    assert!(complete.load(Ordering::SeqCst));
}

#[test]
fn test_loopback_task() {
    let bench = bench();
    let memory: &'static Arena = Box::leak(Box::new(Arena::new()));
    let mut session = connect(bench.registry, memory, 0);
    memory.store(Arena::SEND, &[1, 2, 3, 4, 5, 6, 7, 8]);

    let mut executor = LocalPool::new();
    let spawner = executor.spawner();
    let loopback = bench.loopback.clone();
    spawner
        .spawn_local_obj(Box::new(run_loopback(loopback)).into())
        .unwrap();

    let bytes = write(REMOTE_NODE, 0, 8).to_bytes();
    let reply = executor.run_until(async {
        session.submit(&bytes).await.unwrap();
        RequestRecord::from_bytes(&session.consume().await)
    });
    assert_eq!(reply.error_code(), ErrorCode::Success);

    let bytes = read(REMOTE_NODE, 4, 4).to_bytes();
    let reply = executor.run_until(async {
        session.submit(&bytes).await.unwrap();
        RequestRecord::from_bytes(&session.consume().await)
    });
    assert_eq!(reply.length, 4);
    assert_eq!(memory.load(Arena::RECV, 4), [5, 6, 7, 8]);
}

async fn run_loopback(loopback: Arc<Loopback<RawMutex>>) {
    loopback.run().await;
}

#[test]
fn test_close_waits_for_pending() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);

    for node in [REMOTE_NODE, REMOTE_NODE, NodeId::new(5)] {
        submit(&mut session, read(node, 0, 4));
    }
    assert_eq!(session.pending(), 3);

    let loopback = bench.loopback.clone();
    let worker = thread::spawn(move || {
        let mut serviced = 0;
        while serviced < 3 {
            thread::sleep(Duration::from_millis(1));
            serviced += loopback.service();
        }
    });

    block_on(session.close());
    worker.join().unwrap();

    assert_eq!(bench.loopback.sent_len(), 0);
    assert_eq!(bench.registry.usage(HOST), Some(0));
    assert_eq!(bench.registry.labels_in_use(HOST, REMOTE_NODE), Some(0));
}

#[test]
fn test_close_idle() {
    let bench = bench();
    let memory = Arena::new();

    let session = Session::open(bench.registry, &memory);
    block_on(session.close());

    let mut session = connect(bench.registry, &memory, 0);
    roundtrip(&mut session, iso_listen(3, 8));
    bench
        .link
        .iso_receive(rawbus::core::Channel::from_u8_truncating(3), &[0; 4]);
    assert!(session.is_readable());

    block_on(session.close());
    assert!(bench.loopback.listening().is_empty());
    assert_eq!(bench.registry.usage(HOST), Some(0));
}

#[test]
fn test_drop_with_pending() {
    let bench = bench();
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);
    assert_eq!(session.state(), SessionState::Connected);

    submit(&mut session, read(REMOTE_NODE, 0, 4));
    submit(&mut session, read(REMOTE_NODE, 4, 4));
    drop(session);
    assert_eq!(bench.registry.usage(HOST), Some(0));
    assert_eq!(bench.registry.labels_in_use(HOST, REMOTE_NODE), Some(2));

    // Late completions release the labels and the requests
    assert_eq!(bench.loopback.service(), 2);
    assert_eq!(bench.registry.labels_in_use(HOST, REMOTE_NODE), Some(0));
    assert_eq!(memory.load(Arena::RECV, 4), [0; 4]);
}

#[test]
fn test_sessions_are_independent() {
    let bench = bench();
    let (first_memory, second_memory) = (Arena::new(), Arena::new());
    let mut first = connect(bench.registry, &first_memory, 0);
    let mut second = Session::open(bench.registry, &second_memory);

    submit(&mut first, read(REMOTE_NODE, 0, 4));
    bench.loopback.service();
    assert!(!second.is_readable());
    assert_eq!(second.state(), SessionState::Opened);

    let reply = roundtrip(&mut second, read(REMOTE_NODE, 0, 4));
    assert_eq!(reply.error_code(), ErrorCode::OutOfOrderRequest);
    assert_eq!(next_reply(&mut first).error_code(), ErrorCode::Success);
}

#[test]
fn test_completions_race_with_client() {
    const COUNT: u64 = 500;
    let mut loopback = rawbus_loopback::config::Config::default();
    loopback.node_count = 3;
    let bench = bench_with(rawbus::config::Config::default(), loopback);
    let memory = Arena::new();
    let mut session = connect(bench.registry, &memory, 0);
    let nodes = [REMOTE_NODE, NodeId::new(2)];

    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let loopback = bench.loopback.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                if loopback.service() == 0 {
                    thread::yield_now();
                }
            }
        })
    };

    let mut tags = BTreeSet::new();
    let mut next = 0;
    while (tags.len() as u64) < COUNT {
        if next < COUNT {
            let request = RequestRecord {
                tag: next,
                ..read(nodes[(next % 2) as usize], 0, 4)
            };
            match session.try_submit(&request.to_bytes()) {
                Ok(_) => next += 1,
                Err(SubmitError::WouldBlock) => {}
                Err(error) => panic!("submission failed: {:?}", error),
            }
        }
        while let Ok(bytes) = session.try_consume() {
            let reply = RequestRecord::from_bytes(&bytes);
            assert_eq!(reply.error_code(), ErrorCode::Success);
            assert!(tags.insert(reply.tag), "duplicate reply {}", reply.tag);
        }
    }
    stop.store(true, Ordering::Release);
    worker.join().unwrap();

    assert_eq!(tags.len() as u64, COUNT);
    assert!(!session.is_readable());
    assert_eq!(session.pending(), 0);
    for node in nodes {
        assert_eq!(bench.registry.labels_in_use(HOST, node), Some(0));
    }
}

#![allow(dead_code)]

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use rawbus::client::{ClientMemory, Fault};
use rawbus::config::Config;
use rawbus::core::{Address, HostId, NodeId, Offset};
use rawbus::format::{ErrorCode, RequestKind, RequestRecord};
use rawbus::link::Link;
use rawbus::{Registry, Session, SessionState};
use rawbus_loopback::Loopback;
use std::boxed::Box;
use std::sync::{Arc, Mutex};
use std::vec::Vec;

pub type RawMutex = CriticalSectionRawMutex;

pub const HOST: HostId = HostId::new(0);
pub const LOCAL_NODE: NodeId = NodeId::new(0);
pub const REMOTE_NODE: NodeId = NodeId::new(1);

/// Client address space. Accesses beyond its end fault.
pub struct Arena(Mutex<Vec<u8>>);

impl Arena {
    pub const SEND: u64 = 0x100;
    pub const RECV: u64 = 0x200;
    pub const SIZE: usize = 0x1000;

    pub fn new() -> Self {
        Self(Mutex::new(std::vec![0; Self::SIZE]))
    }

    pub fn store(&self, address: u64, data: &[u8]) {
        self.write(address, data).unwrap();
    }

    pub fn load(&self, address: u64, length: usize) -> Vec<u8> {
        let mut buffer = std::vec![0; length];
        self.read(address, &mut buffer).unwrap();
        buffer
    }
}

impl ClientMemory for Arena {
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), Fault> {
        let memory = self.0.lock().unwrap();
        let start = usize::try_from(address).map_err(|_| Fault)?;
        let source = memory
            .get(start..start + buffer.len())
            .ok_or(Fault)?;
        buffer.copy_from_slice(source);
        Ok(())
    }

    fn write(&self, address: u64, data: &[u8]) -> Result<(), Fault> {
        let mut memory = self.0.lock().unwrap();
        let start = usize::try_from(address).map_err(|_| Fault)?;
        let target = memory
            .get_mut(start..start + data.len())
            .ok_or(Fault)?;
        target.copy_from_slice(data);
        Ok(())
    }
}

pub struct Bench {
    pub registry: &'static Registry<RawMutex>,
    pub loopback: Arc<Loopback<RawMutex>>,
    pub link: Link<'static>,
}

pub fn bench() -> Bench {
    bench_with(Config::default(), rawbus_loopback::config::Config::default())
}

pub fn bench_with(config: Config, loopback: rawbus_loopback::config::Config) -> Bench {
    let registry: &'static Registry<RawMutex> = Box::leak(Box::new(Registry::new(config)));
    let loopback = Arc::new(Loopback::new(loopback));
    let link = registry.attach(loopback.clone());
    Bench {
        registry,
        loopback,
        link,
    }
}

pub fn record(kind: RequestKind) -> RequestRecord {
    RequestRecord {
        kind: kind.into(),
        ..Default::default()
    }
}

pub fn handshake(version: u32) -> RequestRecord {
    RequestRecord {
        misc: version,
        ..record(RequestKind::Handshake)
    }
}

pub fn bind_host(index: u32) -> RequestRecord {
    RequestRecord {
        misc: index,
        ..record(RequestKind::BindHost)
    }
}

pub fn read(node: NodeId, offset: u64, length: u32) -> RequestRecord {
    RequestRecord {
        address: Address::from_parts(node, Offset::new(offset).unwrap()).into_u64(),
        length,
        recv_buffer: Arena::RECV,
        ..record(RequestKind::AsyncRead)
    }
}

pub fn write(node: NodeId, offset: u64, length: u32) -> RequestRecord {
    RequestRecord {
        address: Address::from_parts(node, Offset::new(offset).unwrap()).into_u64(),
        length,
        send_buffer: Arena::SEND,
        ..record(RequestKind::AsyncWrite)
    }
}

pub fn lock(node: NodeId, offset: u64, code: u32, length: u32) -> RequestRecord {
    RequestRecord {
        address: Address::from_parts(node, Offset::new(offset).unwrap()).into_u64(),
        misc: code,
        length,
        send_buffer: Arena::SEND,
        recv_buffer: Arena::RECV,
        ..record(RequestKind::Lock)
    }
}

pub fn iso_listen(channel: i32, length: u32) -> RequestRecord {
    RequestRecord {
        misc: channel as u32,
        length,
        recv_buffer: Arena::RECV,
        ..record(RequestKind::IsoListen)
    }
}

pub fn submit(session: &mut Session<'_, RawMutex>, record: RequestRecord) {
    assert_eq!(
        session.try_submit(&record.to_bytes()),
        Ok(RequestRecord::SIZE)
    );
}

pub fn next_reply(session: &mut Session<'_, RawMutex>) -> RequestRecord {
    RequestRecord::from_bytes(&session.try_consume().unwrap())
}

/// Submits a request that completes without a transaction and returns its reply
pub fn roundtrip(session: &mut Session<'_, RawMutex>, record: RequestRecord) -> RequestRecord {
    submit(session, record);
    next_reply(session)
}

pub fn connect<'a>(
    registry: &'a Registry<RawMutex>,
    memory: &'a Arena,
    host: u32,
) -> Session<'a, RawMutex> {
    let mut session = Session::open(registry, memory);
    let initialized = roundtrip(&mut session, handshake(rawbus::format::PROTOCOL_VERSION));
    assert_eq!(initialized.error_code(), ErrorCode::Success);
    let bound = roundtrip(&mut session, bind_host(host));
    assert_eq!(bound.error_code(), ErrorCode::Success);
    assert_eq!(session.state(), SessionState::Connected);
    session
}

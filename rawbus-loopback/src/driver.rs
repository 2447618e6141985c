use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::future::poll_fn;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::Poll;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::waitqueue::WakerRegistration;
use rawbus_core::{Channel, ChannelSet, ExtendedCode, Label, NodeId, Offset, QUADLET_SIZE, Topology};
use rawbus_driver::OutOfMemory;
use rawbus_driver::link::Link;
use rawbus_driver::packet::{Ack, Packet, PacketKind, Response, ResponseCode, lock_operands};
use rawbus_driver::transport::Transport;

use crate::config::Config;

struct State {
    topology: Topology,
    memory_size: usize,
    nodes: BTreeMap<NodeId, Vec<u8>>,
    sent: VecDeque<Packet>,
    sent_trigger: WakerRegistration,
    listening: ChannelSet,
}

impl State {
    fn populate(&mut self) {
        let bus = self.topology.node_id.bus();
        for phy in 0..self.topology.node_count.min(u16::from(NodeId::BROADCAST_PHY)) {
            let memory_size = self.memory_size;
            self.nodes
                .entry(NodeId::from_parts(bus, phy as u8))
                .or_insert_with(|| alloc::vec![0; memory_size]);
        }
    }

    fn local_memory(&mut self) -> Option<&mut Vec<u8>> {
        self.nodes.get_mut(&self.topology.node_id)
    }
}

fn range(memory: &[u8], offset: Offset, length: usize) -> Option<Range<usize>> {
    let start = usize::try_from(offset.into_u64()).ok()?;
    let end = start.checked_add(length)?;
    (end <= memory.len()).then_some(start..end)
}

fn read(memory: &[u8], offset: Offset, buffer: &mut [u8]) -> ResponseCode {
    match range(memory, offset, buffer.len()) {
        Some(range) => {
            buffer.copy_from_slice(&memory[range]);
            ResponseCode::Complete
        }
        None => ResponseCode::AddressError,
    }
}

fn write(memory: &mut [u8], offset: Offset, data: &[u8]) -> ResponseCode {
    match range(memory, offset, data.len()) {
        Some(range) => {
            memory[range].copy_from_slice(data);
            ResponseCode::Complete
        }
        None => ResponseCode::AddressError,
    }
}

fn lock(
    memory: &mut [u8],
    offset: Offset,
    code: ExtendedCode,
    arg: u32,
    data: u32,
) -> Result<u32, ResponseCode> {
    let range = range(memory, offset, QUADLET_SIZE).ok_or(ResponseCode::AddressError)?;
    let mut old = [0; QUADLET_SIZE];
    old.copy_from_slice(&memory[range.clone()]);
    let old = u32::from_be_bytes(old);
    if let Some(new) = code.apply(old, arg, data) {
        memory[range].copy_from_slice(&new.to_be_bytes());
    }
    Ok(old)
}

/// Executes the packet against the address space of the target node
fn execute(memory: Option<&mut Vec<u8>>, packet: &Packet) -> (Ack, ResponseCode, Vec<u8>) {
    let Some(memory) = memory else {
        return (Ack::None, ResponseCode::Complete, Vec::new());
    };

    let mut data = alloc::vec![0; packet.kind.response_len()];
    let rcode = match packet.kind {
        PacketKind::ReadQuadlet | PacketKind::ReadBlock { .. } => {
            read(memory, packet.offset, &mut data)
        }
        PacketKind::WriteQuadlet | PacketKind::WriteBlock { .. } => {
            write(memory, packet.offset, packet.payload())
        }
        PacketKind::Lock { code } => match lock_operands(packet.payload()) {
            Some((arg, operand)) => match lock(memory, packet.offset, code, arg, operand) {
                Ok(old) => {
                    data.copy_from_slice(&old.to_be_bytes());
                    ResponseCode::Complete
                }
                Err(rcode) => rcode,
            },
            None => ResponseCode::TypeError,
        },
    };

    if rcode != ResponseCode::Complete {
        data.clear();
    }
    (Ack::Pending, rcode, data)
}

/// Simulated bus controller
pub struct Loopback<M: RawMutex> {
    name: &'static str,
    reject_sends: AtomicBool,
    fail_allocation: AtomicBool,
    state: Mutex<M, RefCell<State>>,
}

impl<M: RawMutex> Loopback<M> {
    pub fn new(config: Config) -> Self {
        let mut state = State {
            topology: Topology {
                node_id: config.node_id,
                node_count: config.node_count,
            },
            memory_size: config.memory_size,
            nodes: BTreeMap::new(),
            sent: VecDeque::new(),
            sent_trigger: WakerRegistration::new(),
            listening: ChannelSet::NONE,
        };
        state.populate();

        Self {
            name: config.name,
            reject_sends: AtomicBool::new(config.reject_sends),
            fail_allocation: AtomicBool::new(config.fail_allocation),
            state: Mutex::new(RefCell::new(state)),
        }
    }

    pub fn set_reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::Relaxed);
    }

    pub fn set_fail_allocation(&self, fail: bool) {
        self.fail_allocation.store(fail, Ordering::Relaxed);
    }

    /// Channels currently requested by the engine
    pub fn listening(&self) -> ChannelSet {
        self.state.lock(|state| state.borrow().listening)
    }

    /// Number of sent packets waiting for service
    pub fn sent_len(&self) -> usize {
        self.state.lock(|state| state.borrow().sent.len())
    }

    /// Removes the oldest sent packet without servicing it
    ///
    /// The caller becomes responsible for firing its completion.
    pub fn pop_sent(&self) -> Option<Packet> {
        self.state
            .lock(|state| state.borrow_mut().sent.pop_front())
    }

    /// Services the oldest sent packet. Returns false if none was waiting.
    pub fn service_one(&self) -> bool {
        let Some((mut packet, (ack, rcode, data))) = self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let packet = state.sent.pop_front()?;
            let outcome = execute(state.nodes.get_mut(&packet.destination), &packet);
            Some((packet, outcome))
        }) else {
            return false;
        };

        trace!(
            "{}: label {} to node {:x} serviced",
            self.name,
            packet.label.into_u8(),
            packet.destination.into_u16()
        );
        if let Some(completion) = packet.take_completion() {
            completion.complete(Response {
                ack,
                rcode,
                data: &data,
            });
        }
        true
    }

    /// Services all sent packets. Returns the number of serviced packets.
    pub fn service(&self) -> usize {
        let mut count = 0;
        while self.service_one() {
            count += 1;
        }
        count
    }

    /// Completes all sent packets as aborted
    pub fn abort_all(&self) -> usize {
        let mut count = 0;
        while let Some(mut packet) = self.pop_sent() {
            if let Some(completion) = packet.take_completion() {
                completion.complete(Response {
                    ack: Ack::Aborted,
                    rcode: ResponseCode::Complete,
                    data: &[],
                });
            }
            count += 1;
        }
        count
    }

    /// Services sent packets as they arrive
    pub async fn run(&self) -> ! {
        loop {
            poll_fn(|cx| {
                self.state.lock(|state| {
                    let mut state = state.borrow_mut();
                    if state.sent.is_empty() {
                        state.sent_trigger.register(cx.waker());
                        Poll::Pending
                    } else {
                        Poll::Ready(())
                    }
                })
            })
            .await;
            self.service();
        }
    }

    /// Changes the topology and reports the bus reset
    pub fn bus_reset(&self, link: &Link<'_>, topology: Topology) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            state.topology = topology;
            state.populate();
        });
        debug!(
            "{}: bus reset, node {:x} of {}",
            self.name,
            topology.node_id.into_u16(),
            topology.node_count
        );
        link.bus_reset(topology);
    }

    /// Reads the address space of a simulated node
    pub fn peek(&self, node: NodeId, offset: Offset, buffer: &mut [u8]) -> ResponseCode {
        self.state.lock(|state| match state.borrow().nodes.get(&node) {
            Some(memory) => read(memory, offset, buffer),
            None => ResponseCode::AddressError,
        })
    }

    /// Writes the address space of a simulated node
    pub fn poke(&self, node: NodeId, offset: Offset, data: &[u8]) -> ResponseCode {
        self.state.lock(|state| match state.borrow_mut().nodes.get_mut(&node) {
            Some(memory) => write(memory, offset, data),
            None => ResponseCode::AddressError,
        })
    }
}

impl<M: RawMutex + Send + Sync> Transport for Loopback<M> {
    fn name(&self) -> &str {
        self.name
    }

    fn topology(&self) -> Topology {
        self.state.lock(|state| state.borrow().topology)
    }

    fn build_packet(
        &self,
        kind: PacketKind,
        destination: NodeId,
        offset: Offset,
        label: Label,
    ) -> Result<Packet, OutOfMemory> {
        if self.fail_allocation.load(Ordering::Relaxed) {
            return Err(OutOfMemory);
        }
        Packet::new(kind, destination, offset, label)
    }

    fn send(&self, packet: Packet) -> bool {
        if self.reject_sends.load(Ordering::Relaxed) {
            debug!("{}: send rejected", self.name);
            return false;
        }
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            state.sent.push_back(packet);
            state.sent_trigger.wake();
        });
        true
    }

    fn read(&self, offset: Offset, buffer: &mut [u8]) -> ResponseCode {
        self.state
            .lock(|state| match state.borrow_mut().local_memory() {
                Some(memory) => read(memory, offset, buffer),
                None => ResponseCode::AddressError,
            })
    }

    fn write(&self, offset: Offset, data: &[u8]) -> ResponseCode {
        self.state
            .lock(|state| match state.borrow_mut().local_memory() {
                Some(memory) => write(memory, offset, data),
                None => ResponseCode::AddressError,
            })
    }

    fn lock(
        &self,
        offset: Offset,
        code: ExtendedCode,
        arg: u32,
        data: u32,
    ) -> Result<u32, ResponseCode> {
        self.state
            .lock(|state| match state.borrow_mut().local_memory() {
                Some(memory) => lock(memory, offset, code, arg, data),
                None => Err(ResponseCode::AddressError),
            })
    }

    fn listen(&self, channel: Channel) {
        self.state
            .lock(|state| state.borrow_mut().listening.insert(channel));
    }

    fn unlisten(&self, channel: Channel) {
        self.state
            .lock(|state| state.borrow_mut().listening.remove(channel));
    }
}

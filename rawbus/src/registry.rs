//! Attached hosts and the sessions bound to them

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use core::task::{Context, Poll};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use rawbus_core::{Channel, ChannelSet, Generation, HostId, Label, NodeId, Topology};
use rawbus_driver::OutOfMemory;
use rawbus_driver::link::Link;
use rawbus_driver::transport::Transport;

use crate::config::Config;
use crate::format::{ErrorCode, HostListEntry};
use crate::session::queues::Shared;

mod events;
mod labels;

use labels::LabelPool;

const NAME_CAPACITY: usize = HostListEntry::NAME_SIZE - 1;

#[derive(Debug, Clone, Copy)]
struct HostState {
    generation: Generation,
    topology: Topology,
}

/// An attached bus controller
pub(crate) struct Host<M: RawMutex> {
    id: HostId,
    name: heapless::String<NAME_CAPACITY>,
    transport: Arc<dyn Transport>,
    state: Mutex<M, Cell<HostState>>,
    labels: Mutex<M, RefCell<LabelPool>>,
    usage: AtomicUsize,
    detached: AtomicBool,
}

impl<M: RawMutex> Host<M> {
    fn new(id: HostId, transport: Arc<dyn Transport>, label_capacity: u32) -> Self {
        let mut name = heapless::String::new();
        for c in transport.name().chars() {
            if name.push(c).is_err() {
                break;
            }
        }
        let topology = transport.topology();

        Self {
            id,
            name,
            transport,
            state: Mutex::new(Cell::new(HostState {
                generation: Generation::default(),
                topology,
            })),
            labels: Mutex::new(RefCell::new(LabelPool::new(label_capacity))),
            usage: AtomicUsize::new(0),
            detached: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn generation(&self) -> Generation {
        self.state.lock(|state| state.get().generation)
    }

    pub fn topology(&self) -> Topology {
        self.state.lock(|state| state.get().topology)
    }

    pub fn snapshot(&self) -> (Generation, Topology) {
        self.state.lock(|state| {
            let state = state.get();
            (state.generation, state.topology)
        })
    }

    fn reset(&self, topology: Topology) -> Generation {
        self.state.lock(|state| {
            let generation = state.get().generation.next();
            state.set(HostState {
                generation,
                topology,
            });
            generation
        })
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed)
    }

    pub fn release_usage(&self) {
        self.usage.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn try_acquire_label(&self, node: NodeId) -> Option<Label> {
        self.labels
            .lock(|labels| labels.borrow_mut().try_acquire(node))
    }

    pub fn poll_acquire_label(&self, node: NodeId, cx: &mut Context<'_>) -> Poll<Label> {
        self.labels
            .lock(|labels| labels.borrow_mut().poll_acquire(node, cx))
    }

    pub fn release_label(&self, node: NodeId, label: Label) {
        let released = self
            .labels
            .lock(|labels| labels.borrow_mut().release(node, label));
        if !released {
            warn!(
                "host {}: label {} of node {:x} released twice",
                self.id.into_u32(),
                label.into_u8(),
                node.into_u16()
            );
        }
    }

    pub fn labels_in_use(&self, node: NodeId) -> u32 {
        self.labels.lock(|labels| labels.borrow().in_use(node))
    }
}

/// Receive buffer of isochronous deliveries in client memory
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IsoBuffer {
    pub address: u64,
    pub length: u32,
}

struct Binding<M: RawMutex> {
    session: Arc<Shared<M>>,
    channels: ChannelSet,
    iso_buffer: IsoBuffer,
}

struct HostSlot<M: RawMutex> {
    host: Arc<Host<M>>,
    bindings: Vec<Binding<M>>,
}

struct Inner<M: RawMutex> {
    hosts: Vec<HostSlot<M>>,
}

impl<M: RawMutex> Inner<M> {
    fn slot(&self, host: HostId) -> Option<&HostSlot<M>> {
        self.hosts.iter().find(|slot| slot.host.id == host)
    }

    fn binding_mut(&mut self, host: HostId, session: u64) -> Option<&mut Binding<M>> {
        self.hosts
            .iter_mut()
            .find(|slot| slot.host.id == host)?
            .bindings
            .iter_mut()
            .find(|binding| binding.session.id() == session)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindError {
    NoSuchHost,
    GenerationChanged(Generation),
    OutOfMemory,
}

/// Registry of attached bus controllers
///
/// Attachment order defines the host index used by host enumeration and binding.
/// A single critical section guards the host list, session bindings and channel
/// subscriptions. Transports are never called while it is held.
pub struct Registry<M: RawMutex> {
    config: Config,
    next_host: AtomicU32,
    next_session: AtomicU64,
    inner: Mutex<M, RefCell<Inner<M>>>,
}

impl<M: RawMutex> Registry<M> {
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            next_host: AtomicU32::new(0),
            next_session: AtomicU64::new(0),
            inner: Mutex::new(RefCell::new(Inner { hosts: Vec::new() })),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn host_count(&self) -> usize {
        self.inner.lock(|inner| inner.borrow().hosts.len())
    }

    /// Current generation of the host, `None` if the host is not attached
    pub fn generation(&self, host: HostId) -> Option<Generation> {
        self.host(host).map(|host| host.generation())
    }

    pub fn topology(&self, host: HostId) -> Option<Topology> {
        self.host(host).map(|host| host.topology())
    }

    /// Number of sessions bound to the host
    pub fn usage(&self, host: HostId) -> Option<usize> {
        self.host(host).map(|host| host.usage())
    }

    /// Number of outstanding transactions to the node
    pub fn labels_in_use(&self, host: HostId, node: NodeId) -> Option<u32> {
        self.host(host).map(|host| host.labels_in_use(node))
    }

    /// Removes the host from enumeration
    ///
    /// Bound sessions stay alive. Their further requests complete as aborted.
    /// Returns false if the host is not attached.
    pub fn detach(&self, host: HostId) -> bool {
        let slot = self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let index = inner.hosts.iter().position(|slot| slot.host.id == host)?;
            Some(inner.hosts.remove(index))
        });

        match slot {
            Some(slot) => {
                slot.host.detached.store(true, Ordering::Release);
                info!(
                    "host {} detached, {} sessions left bound",
                    host.into_u32(),
                    slot.bindings.len()
                );
                true
            }
            None => {
                warn!("detach of unknown host {}", host.into_u32());
                false
            }
        }
    }

    fn host(&self, host: HostId) -> Option<Arc<Host<M>>> {
        self.inner
            .lock(|inner| inner.borrow().slot(host).map(|slot| slot.host.clone()))
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn list_hosts(&self) -> Result<Vec<HostListEntry>, OutOfMemory> {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            let mut entries = Vec::new();
            entries
                .try_reserve_exact(inner.hosts.len())
                .map_err(|_| OutOfMemory)?;
            entries.extend(inner.hosts.iter().map(|slot| {
                let topology = slot.host.topology();
                HostListEntry::new(topology.node_count, &slot.host.name)
            }));
            Ok(entries)
        })
    }

    /// Checks a generation against every attached host
    ///
    /// Returns the live generation of the first host in another generation.
    pub(crate) fn check_generation(&self, expected: Generation) -> Result<(), Generation> {
        self.inner.lock(|inner| {
            inner
                .borrow()
                .hosts
                .iter()
                .map(|slot| slot.host.generation())
                .find(|live| *live != expected)
                .map_or(Ok(()), Err)
        })
    }

    /// Binds the session to the host with the given enumeration index
    ///
    /// If `expected` is set, the binding fails unless the host is still in that generation.
    pub(crate) fn bind(
        &self,
        index: u32,
        session: &Arc<Shared<M>>,
        expected: Option<Generation>,
    ) -> Result<Arc<Host<M>>, BindError> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let slot = usize::try_from(index)
                .ok()
                .and_then(|index| inner.hosts.get_mut(index))
                .ok_or(BindError::NoSuchHost)?;

            if let Some(expected) = expected {
                let live = slot.host.generation();
                if live != expected {
                    return Err(BindError::GenerationChanged(live));
                }
            }

            slot.bindings
                .try_reserve(1)
                .map_err(|_| BindError::OutOfMemory)?;
            slot.bindings.push(Binding {
                session: session.clone(),
                channels: ChannelSet::NONE,
                iso_buffer: IsoBuffer::default(),
            });
            slot.host.usage.fetch_add(1, Ordering::Relaxed);
            Ok(slot.host.clone())
        })
    }

    /// Removes the binding together with its subscriptions
    pub(crate) fn unbind(&self, host: HostId, session: u64) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if let Some(slot) = inner.hosts.iter_mut().find(|slot| slot.host.id == host) {
                slot.bindings.retain(|binding| binding.session.id() != session);
            }
        });
    }

    pub(crate) fn subscribe(
        &self,
        host: HostId,
        session: u64,
        channel: Channel,
        iso_buffer: IsoBuffer,
    ) -> Result<(), ErrorCode> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let binding = inner
                .binding_mut(host, session)
                .ok_or(ErrorCode::InvalidArgument)?;
            if binding.channels.contains(channel) {
                return Err(ErrorCode::AlreadySubscribed);
            }
            binding.channels.insert(channel);
            binding.iso_buffer = iso_buffer;
            Ok(())
        })
    }

    pub(crate) fn unsubscribe(
        &self,
        host: HostId,
        session: u64,
        channel: Channel,
    ) -> Result<(), ErrorCode> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let binding = inner
                .binding_mut(host, session)
                .ok_or(ErrorCode::InvalidArgument)?;
            if !binding.channels.contains(channel) {
                return Err(ErrorCode::InvalidArgument);
            }
            binding.channels.remove(channel);
            Ok(())
        })
    }

    /// Stops fan-out to the session
    ///
    /// Subscriptions of a detached host are already gone.
    pub(crate) fn unsubscribe_all(&self, host: HostId, session: u64) {
        self.inner.lock(|inner| {
            if let Some(binding) = inner.borrow_mut().binding_mut(host, session) {
                binding.channels = ChannelSet::NONE;
            }
        });
    }
}

impl<M: RawMutex + Send + Sync> Registry<M> {
    /// Appends the host to the enumeration and returns its event channel
    pub fn attach(&self, transport: Arc<dyn Transport>) -> Link<'_> {
        let id = HostId::new(self.next_host.fetch_add(1, Ordering::Relaxed));
        let host = Host::new(id, transport, self.config.label_capacity());
        info!(
            "host {} attached: {}, {} nodes",
            id.into_u32(),
            host.name.as_str(),
            host.topology().node_count
        );

        self.inner.lock(|inner| {
            inner.borrow_mut().hosts.push(HostSlot {
                host: Arc::new(host),
                bindings: Vec::new(),
            });
        });
        Link::new(self, id)
    }
}

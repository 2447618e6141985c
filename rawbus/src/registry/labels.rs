use alloc::collections::BTreeMap;
use core::task::{Context, Poll};
use embassy_sync::waitqueue::MultiWakerRegistration;
use rawbus_core::{Label, NodeId};

const WAITER_SLOTS: usize = 4;

#[derive(Default)]
struct NodeLabels {
    in_use: u64,
    next: Label,
}

impl NodeLabels {
    fn is_used(&self, label: Label) -> bool {
        (self.in_use >> label.into_u8()) & 0x1 != 0
    }
}

/// Transaction label allocator of a single host
///
/// Each target node has its own label space. Labels are handed out round-robin, so a label
/// released by a late response is not immediately reused.
pub(crate) struct LabelPool {
    capacity: u32,
    nodes: BTreeMap<NodeId, NodeLabels>,
    waiters: MultiWakerRegistration<WAITER_SLOTS>,
}

impl LabelPool {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.min(Label::COUNT as u32),
            nodes: BTreeMap::new(),
            waiters: MultiWakerRegistration::new(),
        }
    }

    pub fn try_acquire(&mut self, node: NodeId) -> Option<Label> {
        let entry = self.nodes.entry(node).or_default();
        if entry.in_use.count_ones() >= self.capacity {
            return None;
        }

        let mut label = entry.next;
        for _ in 0..Label::COUNT {
            if !entry.is_used(label) {
                entry.in_use |= 1 << label.into_u8();
                entry.next = label.next();
                return Some(label);
            }
            label = label.next();
        }
        None
    }

    pub fn poll_acquire(&mut self, node: NodeId, cx: &mut Context<'_>) -> Poll<Label> {
        match self.try_acquire(node) {
            Some(label) => Poll::Ready(label),
            None => {
                self.waiters.register(cx.waker());
                Poll::Pending
            }
        }
    }

    /// Returns the label to the pool. Returns false if the label was not in use.
    pub fn release(&mut self, node: NodeId, label: Label) -> bool {
        let Some(entry) = self.nodes.get_mut(&node) else {
            return false;
        };
        if !entry.is_used(label) {
            return false;
        }

        entry.in_use &= !(1 << label.into_u8());
        self.waiters.wake();
        true
    }

    pub fn in_use(&self, node: NodeId) -> u32 {
        self.nodes
            .get(&node)
            .map_or(0, |entry| entry.in_use.count_ones())
    }
}

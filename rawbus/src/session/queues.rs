use alloc::collections::VecDeque;
use core::cell::RefCell;
use core::sync::atomic::{AtomicU64, Ordering};
use core::task::{Context, Poll};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::waitqueue::WakerRegistration;

use crate::request::PendingRequest;

struct Queues {
    pending: VecDeque<PendingRequest>,
    completed: VecDeque<PendingRequest>,
    readable: WakerRegistration,
    closed: bool,
}

/// Session state shared with completion and registry event paths
///
/// Requests move from `pending` to `completed` within a single critical section.
/// Once closed, newly completed requests are released instead of queued.
pub(crate) struct Shared<M: RawMutex> {
    id: u64,
    next_request: AtomicU64,
    queues: Mutex<M, RefCell<Queues>>,
}

impl<M: RawMutex> Shared<M> {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            next_request: AtomicU64::new(0),
            queues: Mutex::new(RefCell::new(Queues {
                pending: VecDeque::new(),
                completed: VecDeque::new(),
                readable: WakerRegistration::new(),
                closed: false,
            })),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    pub fn push_pending(&self, request: PendingRequest) {
        self.queues.lock(|queues| {
            queues.borrow_mut().pending.push_back(request);
        });
    }

    /// Moves the pending request to the completed queue, applying the outcome on the way
    ///
    /// Returns false if no such request is pending.
    pub fn finish(&self, id: u64, outcome: impl FnOnce(&mut PendingRequest)) -> bool {
        let released = self.queues.lock(|queues| {
            let mut queues = queues.borrow_mut();
            let index = queues.pending.iter().position(|request| request.id == id)?;
            let mut request = unwrap!(queues.pending.remove(index));
            outcome(&mut request);
            if queues.closed {
                return Some(Some(request));
            }
            queues.completed.push_back(request);
            queues.readable.wake();
            Some(None)
        });

        match released {
            Some(released) => {
                drop(released);
                true
            }
            None => false,
        }
    }

    /// Queues a request that never was pending
    pub fn push_completed(&self, request: PendingRequest) {
        let released = self.queues.lock(|queues| {
            let mut queues = queues.borrow_mut();
            if queues.closed {
                return Some(request);
            }
            queues.completed.push_back(request);
            queues.readable.wake();
            None
        });
        drop(released);
    }

    pub fn pop_completed(&self) -> Option<PendingRequest> {
        self.queues
            .lock(|queues| queues.borrow_mut().completed.pop_front())
    }

    pub fn poll_pop_completed(&self, cx: &mut Context<'_>) -> Poll<PendingRequest> {
        self.queues.lock(|queues| {
            let mut queues = queues.borrow_mut();
            match queues.completed.pop_front() {
                Some(request) => Poll::Ready(request),
                None => {
                    queues.readable.register(cx.waker());
                    Poll::Pending
                }
            }
        })
    }

    pub fn is_readable(&self) -> bool {
        self.queues
            .lock(|queues| !queues.borrow().completed.is_empty())
    }

    pub fn poll_readable(&self, cx: &mut Context<'_>) -> Poll<()> {
        self.queues.lock(|queues| {
            let mut queues = queues.borrow_mut();
            if queues.completed.is_empty() {
                queues.readable.register(cx.waker());
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        })
    }

    pub fn pending_len(&self) -> usize {
        self.queues.lock(|queues| queues.borrow().pending.len())
    }

    /// Releases completed requests until no request is pending
    pub fn poll_drained(&self, cx: &mut Context<'_>) -> Poll<()> {
        let (released, poll) = self.queues.lock(|queues| {
            let mut queues = queues.borrow_mut();
            let released = core::mem::take(&mut queues.completed);
            let poll = if queues.pending.is_empty() {
                Poll::Ready(())
            } else {
                queues.readable.register(cx.waker());
                Poll::Pending
            };
            (released, poll)
        });
        drop(released);
        poll
    }

    /// Stops queueing completions and releases completed requests
    pub fn shut(&self) {
        let released = self.queues.lock(|queues| {
            let mut queues = queues.borrow_mut();
            queues.closed = true;
            core::mem::take(&mut queues.completed)
        });
        drop(released);
    }
}

//! Transactional FIFO queue
//!
//! A [`TQueue`] keeps its items and shutdown flag in a single cell, so
//! every operation is a single-cell transaction body. Capacity and
//! overflow policy are fixed at construction.
//!
//! Operations return `StmResult` and compose inside any transaction:
//!
//! ```ignore
//! let queue = TQueue::bounded(16);
//!
//! atomically(|| queue.offer(1));
//! let item = atomically(|| queue.take());
//! ```

use std::collections::VecDeque;

use crate::cell::{CellId, TCell};
use crate::stm::{or_else, retry, StmError, StmResult};

/// Maximum number of items a queue holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// At most this many items.
    Bounded(usize),
    /// No limit; `offer` never finds the queue full.
    Unbounded,
}

impl Capacity {
    fn admits(&self, len: usize) -> bool {
        match self {
            Self::Bounded(n) => len < *n,
            Self::Unbounded => true,
        }
    }
}

/// Policy applied when `offer` finds the queue at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Block the producer until space frees up.
    Suspend,
    /// Reject the new item; `offer` returns `false`.
    Dropping,
    /// Evict the oldest item to make room; `offer` returns `true`.
    Sliding,
}

#[derive(Clone)]
struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// A transactional FIFO queue.
///
/// Cloning yields another handle to the same queue.
pub struct TQueue<T> {
    state: TCell<QueueState<T>>,
    capacity: Capacity,
    policy: OverflowPolicy,
}

impl<T: Clone + Send + Sync + 'static> TQueue<T> {
    /// A queue of at most `capacity` items; `offer` at capacity blocks
    /// until a `take` frees space.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self::with_policy(Capacity::Bounded(capacity), OverflowPolicy::Suspend)
    }

    /// A queue without a capacity limit.
    pub fn unbounded() -> Self {
        Self::with_policy(Capacity::Unbounded, OverflowPolicy::Suspend)
    }

    /// A bounded queue that rejects new items when full.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn dropping(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self::with_policy(Capacity::Bounded(capacity), OverflowPolicy::Dropping)
    }

    /// A bounded queue that evicts its oldest item when full.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn sliding(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self::with_policy(Capacity::Bounded(capacity), OverflowPolicy::Sliding)
    }

    pub(crate) fn with_policy(capacity: Capacity, policy: OverflowPolicy) -> Self {
        Self {
            state: TCell::new(QueueState {
                items: VecDeque::new(),
                shutdown: false,
            }),
            capacity,
            policy,
        }
    }

    /// The queue's capacity.
    #[must_use]
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// The queue's overflow policy.
    #[must_use]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Append an item.
    ///
    /// Returns `false` without mutating anything when the queue is shut
    /// down, or when it is full under [`OverflowPolicy::Dropping`].
    /// Under [`OverflowPolicy::Suspend`] a full queue retries until a
    /// `take` or shutdown commit; under [`OverflowPolicy::Sliding`] the
    /// oldest item is evicted and `offer` returns `true`.
    pub fn offer(&self, item: T) -> StmResult<bool> {
        let mut state = self.state.read_tx()?;
        if state.shutdown {
            return Ok(false);
        }
        if self.capacity.admits(state.items.len()) {
            state.items.push_back(item);
            self.state.write_tx(state)?;
            return Ok(true);
        }
        match self.policy {
            OverflowPolicy::Suspend => retry(),
            OverflowPolicy::Dropping => Ok(false),
            OverflowPolicy::Sliding => {
                state.items.pop_front();
                state.items.push_back(item);
                self.state.write_tx(state)?;
                Ok(true)
            }
        }
    }

    /// Offer every item in order, returning `true` iff all were
    /// accepted.
    pub fn offer_all(&self, items: &[T]) -> StmResult<bool> {
        let mut all = true;
        for item in items {
            all &= self.offer(item.clone())?;
        }
        Ok(all)
    }

    /// Remove and return the oldest item, retrying while the queue is
    /// empty. Fails with [`StmError::Closed`] once the queue is both
    /// empty and shut down.
    pub fn take(&self) -> StmResult<T> {
        let mut state = self.state.read_tx()?;
        match state.items.pop_front() {
            Some(item) => {
                self.state.write_tx(state)?;
                Ok(item)
            }
            None if state.shutdown => Err(StmError::Closed),
            None => retry(),
        }
    }

    /// Remove and return the oldest item if present, without blocking.
    ///
    /// Fails with [`StmError::Closed`] on an empty shut-down queue.
    pub fn try_take(&self) -> StmResult<Option<T>> {
        or_else(|| self.take().map(Some), || Ok(None))
    }

    /// Return the oldest item without removing it, retrying while the
    /// queue is empty.
    pub fn peek(&self) -> StmResult<T> {
        let state = self.state.read_tx()?;
        match state.items.front() {
            Some(item) => Ok(item.clone()),
            None if state.shutdown => Err(StmError::Closed),
            None => retry(),
        }
    }

    /// Remove and return every queued item, oldest first. Does not
    /// block on an empty queue.
    pub fn take_all(&self) -> StmResult<Vec<T>> {
        self.take_up_to(usize::MAX)
    }

    /// Remove and return up to `n` items, oldest first. Does not block
    /// on an empty queue.
    pub fn take_up_to(&self, n: usize) -> StmResult<Vec<T>> {
        let mut state = self.state.read_tx()?;
        if state.items.is_empty() {
            if state.shutdown {
                return Err(StmError::Closed);
            }
            return Ok(Vec::new());
        }
        let count = n.min(state.items.len());
        let taken: Vec<T> = state.items.drain(..count).collect();
        self.state.write_tx(state)?;
        Ok(taken)
    }

    /// Shut the queue down. Idempotent.
    ///
    /// Blocked offers and takes are woken by this commit and
    /// re-evaluate against the closed state: offers return `false`,
    /// takes drain the remaining items and then fail with
    /// [`StmError::Closed`].
    pub fn shutdown(&self) -> StmResult<()> {
        let mut state = self.state.read_tx()?;
        if !state.shutdown {
            state.shutdown = true;
            self.state.write_tx(state)?;
        }
        Ok(())
    }

    /// Whether the queue has been shut down.
    pub fn is_shutdown(&self) -> StmResult<bool> {
        Ok(self.state.read_tx()?.shutdown)
    }

    /// Number of queued items.
    pub fn size(&self) -> StmResult<usize> {
        Ok(self.state.read_tx()?.items.len())
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> StmResult<bool> {
        Ok(self.state.read_tx()?.items.is_empty())
    }

    /// Whether the queue is at capacity.
    pub fn is_full(&self) -> StmResult<bool> {
        let state = self.state.read_tx()?;
        Ok(!self.capacity.admits(state.items.len()))
    }

    pub(crate) fn state_id(&self) -> CellId {
        self.state.id()
    }
}

impl<T> Clone for TQueue<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            capacity: self.capacity,
            policy: self.policy,
        }
    }
}

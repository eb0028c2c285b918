//! Transactional broadcast hub
//!
//! A [`THub`] fans published items out to a dynamic set of subscribers,
//! each backed by its own [`TQueue`]. The hub's cell holds only the
//! membership set, so subscribe, unsubscribe and publish interleave
//! through ordinary version validation.
//!
//! A publish is one transaction across every subscriber queue: either
//! all of them advance together in the same commit, or (for a
//! suspend-policy subscriber at capacity) the whole publish retries
//! until that subscriber has room. That also stalls delivery to faster
//! subscribers in the same call; callers wanting independently paced
//! subscribers configure the hub as [`THub::dropping`] or
//! [`THub::sliding`].

use crate::cell::TCell;
use crate::queue::{Capacity, OverflowPolicy, TQueue};
use crate::stm::{atomically, StmError, StmResult};

#[derive(Clone)]
struct HubState<T> {
    subscribers: Vec<TQueue<T>>,
    shutdown: bool,
}

/// A transactional broadcast hub.
///
/// Cloning yields another handle to the same hub. The capacity and
/// overflow policy chosen at construction apply to every subscriber's
/// queue.
pub struct THub<T> {
    state: TCell<HubState<T>>,
    capacity: Capacity,
    policy: OverflowPolicy,
}

impl<T: Clone + Send + Sync + 'static> THub<T> {
    /// A hub whose subscribers each buffer at most `capacity` items;
    /// publishing to a full subscriber blocks until it takes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "hub capacity must be positive");
        Self::with_policy(Capacity::Bounded(capacity), OverflowPolicy::Suspend)
    }

    /// A hub whose subscribers buffer without limit.
    pub fn unbounded() -> Self {
        Self::with_policy(Capacity::Unbounded, OverflowPolicy::Suspend)
    }

    /// A hub that skips a full subscriber rather than blocking.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn dropping(capacity: usize) -> Self {
        assert!(capacity > 0, "hub capacity must be positive");
        Self::with_policy(Capacity::Bounded(capacity), OverflowPolicy::Dropping)
    }

    /// A hub that evicts a full subscriber's oldest item rather than
    /// blocking.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn sliding(capacity: usize) -> Self {
        assert!(capacity > 0, "hub capacity must be positive");
        Self::with_policy(Capacity::Bounded(capacity), OverflowPolicy::Sliding)
    }

    fn with_policy(capacity: Capacity, policy: OverflowPolicy) -> Self {
        Self {
            state: TCell::new(HubState {
                subscribers: Vec::new(),
                shutdown: false,
            }),
            capacity,
            policy,
        }
    }

    /// Publish an item to every current subscriber, atomically.
    ///
    /// Returns `true` iff every subscriber accepted the item; a
    /// dropping-policy subscriber at capacity yields `false`. Returns
    /// `false` without delivering anything once the hub is shut down.
    pub fn publish(&self, item: T) -> StmResult<bool> {
        let state = self.state.read_tx()?;
        if state.shutdown {
            return Ok(false);
        }
        let mut accepted_by_all = true;
        for subscriber in &state.subscribers {
            accepted_by_all &= subscriber.offer(item.clone())?;
        }
        Ok(accepted_by_all)
    }

    /// Publish every item in order, atomically. Returns `true` iff
    /// every subscriber accepted every item.
    pub fn publish_all(&self, items: &[T]) -> StmResult<bool> {
        let mut accepted_by_all = true;
        for item in items {
            accepted_by_all &= self.publish(item.clone())?;
        }
        Ok(accepted_by_all)
    }

    /// Register a new subscriber queue, composable inside a larger
    /// transaction. The queue observes only items published strictly
    /// after this transaction commits.
    ///
    /// The caller owns membership: pair with
    /// [`THub::unsubscribe_tx`], or use [`THub::subscribe`] for the
    /// scoped form.
    pub fn subscribe_tx(&self) -> StmResult<TQueue<T>> {
        let mut state = self.state.read_tx()?;
        if state.shutdown {
            return Err(StmError::Closed);
        }
        let queue = TQueue::with_policy(self.capacity, self.policy);
        state.subscribers.push(queue.clone());
        self.state.write_tx(state)?;
        Ok(queue)
    }

    /// Remove a subscriber queue from the membership set and shut it
    /// down, so a take blocked on it drains and then fails rather than
    /// waiting for publishes that will never arrive. Idempotent.
    pub fn unsubscribe_tx(&self, queue: &TQueue<T>) -> StmResult<()> {
        let mut state = self.state.read_tx()?;
        let id = queue.state_id();
        if state.subscribers.iter().any(|q| q.state_id() == id) {
            state.subscribers.retain(|q| q.state_id() != id);
            self.state.write_tx(state)?;
        }
        queue.shutdown()
    }

    /// Subscribe in a transaction of its own, returning a scoped
    /// [`Subscription`] that removes itself from the hub when dropped.
    ///
    /// Must be called outside any transaction.
    pub fn subscribe(&self) -> StmResult<Subscription<T>> {
        let queue = atomically(|| self.subscribe_tx())?;
        Ok(Subscription::new(self.clone(), queue))
    }

    /// Shut the hub down. Idempotent.
    ///
    /// Every subscriber queue is shut down in the same commit and the
    /// membership set is cleared: subscribers drain their pending items
    /// and then observe [`StmError::Closed`].
    pub fn shutdown(&self) -> StmResult<()> {
        let mut state = self.state.read_tx()?;
        if state.shutdown {
            return Ok(());
        }
        state.shutdown = true;
        for subscriber in &state.subscribers {
            subscriber.shutdown()?;
        }
        state.subscribers.clear();
        self.state.write_tx(state)?;
        Ok(())
    }

    /// Whether the hub has been shut down.
    pub fn is_shutdown(&self) -> StmResult<bool> {
        Ok(self.state.read_tx()?.shutdown)
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> StmResult<usize> {
        Ok(self.state.read_tx()?.subscribers.len())
    }
}

impl<T> Clone for THub<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            capacity: self.capacity,
            policy: self.policy,
        }
    }
}

/// A scoped hub subscription.
///
/// Dropping (or explicitly unsubscribing) removes this subscriber from
/// the hub's membership in one transaction, so subsequent publishes
/// stop targeting it. Do not drop inside a transaction.
pub struct Subscription<T: Clone + Send + Sync + 'static> {
    hub: THub<T>,
    queue: TQueue<T>,
    active: bool,
}

impl<T: Clone + Send + Sync + 'static> Subscription<T> {
    pub(crate) fn new(hub: THub<T>, queue: TQueue<T>) -> Self {
        Self {
            hub,
            queue,
            active: true,
        }
    }

    /// Remove and return the oldest delivered item, retrying while none
    /// is pending. Fails with [`StmError::Closed`] once the hub (or
    /// this subscription) is closed and the backlog is drained.
    pub fn take(&self) -> StmResult<T> {
        self.queue.take()
    }

    /// Remove and return the oldest delivered item if present.
    pub fn try_take(&self) -> StmResult<Option<T>> {
        self.queue.try_take()
    }

    /// Remove and return every delivered item, oldest first.
    pub fn take_all(&self) -> StmResult<Vec<T>> {
        self.queue.take_all()
    }

    /// Number of delivered items not yet taken.
    pub fn size(&self) -> StmResult<usize> {
        self.queue.size()
    }

    /// Remove this subscriber from the hub now. Idempotent; also runs
    /// on drop. Must be called outside any transaction.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let _ = atomically(|| self.hub.unsubscribe_tx(&self.queue));
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

//! Transactional observable cell
//!
//! A [`TWatch`] pairs a current-value cell with an unbounded broadcast
//! hub. Every committed write updates the value and publishes it in the
//! same transaction, so subscribers observe exactly the committed
//! sequence of values: no gaps, no duplicates, and the same total order
//! for every subscriber.

use crate::cell::TCell;
use crate::hub::{Subscription, THub};
use crate::stm::{atomically, atomically_or_interrupt, InterruptToken, StmError, StmResult};

/// An observable transactional cell.
///
/// Cloning yields another handle to the same watch.
pub struct TWatch<T> {
    current: TCell<T>,
    hub: THub<T>,
}

impl<T: Clone + Send + Sync + 'static> TWatch<T> {
    /// Create a watch holding `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            current: TCell::new(initial),
            hub: THub::unbounded(),
        }
    }

    /// Read the current value.
    pub fn get(&self) -> StmResult<T> {
        self.current.read_tx()
    }

    /// Store a new value and publish it to every subscriber in the same
    /// transaction. Fails with [`StmError::Closed`] once the watch is
    /// closed.
    pub fn set(&self, value: T) -> StmResult<()> {
        if self.hub.is_shutdown()? {
            return Err(StmError::Closed);
        }
        self.current.write_tx(value.clone())?;
        self.hub.publish(value)?;
        Ok(())
    }

    /// Replace the value with `f` applied to it.
    pub fn update(&self, f: impl FnOnce(T) -> T) -> StmResult<()> {
        let value = self.get()?;
        self.set(f(value))
    }

    /// Replace the value with the second component of `f`'s result and
    /// return the first.
    pub fn modify<B>(&self, f: impl FnOnce(T) -> (B, T)) -> StmResult<B> {
        let (out, next) = f(self.get()?);
        self.set(next)?;
        Ok(out)
    }

    /// Subscribe to the value's change stream.
    ///
    /// The stream yields the value current at subscribe time first,
    /// then every subsequent committed update exactly once. Must be
    /// called outside any transaction.
    pub fn changes(&self) -> StmResult<Changes<T>> {
        let (first, queue) = atomically(|| {
            let value = self.current.read_tx()?;
            let queue = self.hub.subscribe_tx()?;
            Ok((value, queue))
        })?;
        Ok(Changes {
            first: Some(first),
            sub: Subscription::new(self.hub.clone(), queue),
        })
    }

    /// Close the watch's change stream. Idempotent.
    ///
    /// Reads keep working; writes and new subscriptions fail with
    /// [`StmError::Closed`], and existing subscribers drain their
    /// backlog before observing closure.
    pub fn close(&self) -> StmResult<()> {
        self.hub.shutdown()
    }

    /// Whether the watch has been closed.
    pub fn is_closed(&self) -> StmResult<bool> {
        self.hub.is_shutdown()
    }
}

impl<T> Clone for TWatch<T> {
    fn clone(&self) -> Self {
        Self {
            current: self.current.clone(),
            hub: self.hub.clone(),
        }
    }
}

/// A subscriber's view of a [`TWatch`]'s committed value sequence.
///
/// Unsubscribes from the watch when dropped.
pub struct Changes<T: Clone + Send + Sync + 'static> {
    first: Option<T>,
    sub: Subscription<T>,
}

impl<T: Clone + Send + Sync + 'static> Changes<T> {
    /// Next value in the stream, blocking until one is committed.
    ///
    /// The first call yields the value observed at subscribe time.
    /// Fails with [`StmError::Closed`] once the watch is closed and the
    /// backlog is drained. Must be called outside any transaction.
    pub fn next(&mut self) -> StmResult<T> {
        if let Some(value) = self.first.take() {
            return Ok(value);
        }
        atomically(|| self.sub.take())
    }

    /// Like [`Changes::next`], but unwound with
    /// [`StmError::Interrupted`] when `token` fires while blocked.
    pub fn next_or_interrupt(&mut self, token: &InterruptToken) -> StmResult<T> {
        if let Some(value) = self.first.take() {
            return Ok(value);
        }
        atomically_or_interrupt(token, || self.sub.take())
    }

    /// Next value if one is already pending.
    pub fn try_next(&mut self) -> StmResult<Option<T>> {
        if let Some(value) = self.first.take() {
            return Ok(Some(value));
        }
        atomically(|| self.sub.try_take())
    }
}

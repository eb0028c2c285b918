//! Transactional cells
//!
//! A [`TCell`] is the atomic unit of shared mutable state: a value slot
//! paired with a version number. The committed value is only ever
//! replaced by the engine's commit path, which bumps the version by
//! exactly one per committed write. Versions drive the engine's
//! optimistic validation.
//!
//! Inside a transaction, [`TCell::read_tx`] and [`TCell::write_tx`]
//! operate on the transaction's journal. Reads see the transaction's own
//! pending writes; writes stay buffered until commit.
//!
//! # Example
//!
//! ```ignore
//! let balance = TCell::new(100);
//!
//! atomically(|| {
//!     let b = balance.read_tx()?;
//!     balance.write_tx(b - 30)
//! });
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::stm::{with_txn, StmResult, Waiter};

/// Unique identifier for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// Committed storage. Value and version live under one lock so a reader
/// always observes a coherent pair.
struct Slot<T> {
    value: T,
    version: u64,
}

struct CellInner<T> {
    slot: RwLock<Slot<T>>,
    /// Parked transactions interested in this cell.
    waiters: Mutex<Vec<Arc<Waiter>>>,
}

/// A transactional cell.
///
/// Cloning a `TCell` yields another handle to the same cell. The value
/// type must be `Clone` because reads hand out snapshots and commits
/// store buffered copies.
pub struct TCell<T> {
    id: CellId,
    inner: Arc<CellInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> TCell<T> {
    /// Create a new cell with the given initial value, at version 0.
    pub fn new(value: T) -> Self {
        Self {
            id: CellId::next(),
            inner: Arc::new(CellInner {
                slot: RwLock::new(Slot { value, version: 0 }),
                waiters: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Get the cell's unique identifier.
    #[must_use]
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Read the value within the current transaction.
    ///
    /// Returns the transaction's own pending write if one exists,
    /// otherwise the committed value, recording the version seen so the
    /// commit can validate the read.
    ///
    /// # Panics
    ///
    /// Panics when called outside [`crate::atomically`]. That is a
    /// structural bug in the calling code, not a recoverable condition.
    pub fn read_tx(&self) -> StmResult<T> {
        with_txn(|txn| txn.read(self))
    }

    /// Buffer a write within the current transaction.
    ///
    /// Nothing is visible to other transactions until commit.
    ///
    /// # Panics
    ///
    /// Panics when called outside [`crate::atomically`].
    pub fn write_tx(&self, value: T) -> StmResult<()> {
        with_txn(|txn| txn.write(self, value))
    }

    /// Apply `f` to the cell's value within the current transaction.
    pub fn update_tx(&self, f: impl FnOnce(T) -> T) -> StmResult<()> {
        let value = self.read_tx()?;
        self.write_tx(f(value))
    }

    /// Apply `f` within the current transaction, storing the second
    /// component of its result and returning the first.
    pub fn modify_tx<B>(&self, f: impl FnOnce(T) -> (B, T)) -> StmResult<B> {
        let (out, next) = f(self.read_tx()?);
        self.write_tx(next)?;
        Ok(out)
    }

    /// Snapshot the committed value outside any transaction.
    ///
    /// Inspection only: a `read_now` composes with nothing and decisions
    /// must not be based on it. Use [`TCell::read_tx`] inside
    /// [`crate::atomically`] for that.
    pub fn read_now(&self) -> T {
        self.inner.slot.read().value.clone()
    }

    /// The committed version, for diagnostics.
    #[must_use]
    pub fn version_now(&self) -> u64 {
        self.inner.slot.read().version
    }

    /// Load a coherent (value, version) pair.
    pub(crate) fn load(&self) -> (T, u64) {
        let slot = self.inner.slot.read();
        (slot.value.clone(), slot.version)
    }
}

impl<T> Clone for TCell<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for TCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TCell")
            .field("id", &self.id)
            .field("version", &self.version_now())
            .finish()
    }
}

/// Type-erased cell operations for the engine's journal and commit path.
pub(crate) trait CellOps: Send + Sync {
    fn id(&self) -> CellId;

    fn current_version(&self) -> u64;

    /// Apply a committed write: store the value and bump the version.
    /// Only the engine's commit path, holding the commit lock, calls
    /// this.
    fn commit_value(&self, value: Arc<dyn Any + Send + Sync>);

    /// Register a parked transaction's waiter on this cell.
    fn register_waiter(&self, waiter: Arc<Waiter>);

    /// Move every still-pending waiter into `into`, clearing the list.
    fn drain_waiters(&self, into: &mut SmallVec<[Arc<Waiter>; 8]>);
}

impl<T: Clone + Send + Sync + 'static> CellOps for TCell<T> {
    fn id(&self) -> CellId {
        self.id
    }

    fn current_version(&self) -> u64 {
        self.inner.slot.read().version
    }

    fn commit_value(&self, value: Arc<dyn Any + Send + Sync>) {
        if let Ok(value) = value.downcast::<T>() {
            let mut slot = self.inner.slot.write();
            slot.value = (*value).clone();
            slot.version += 1;
        }
    }

    fn register_waiter(&self, waiter: Arc<Waiter>) {
        let mut waiters = self.inner.waiters.lock();
        waiters.retain(|w| w.is_pending());
        waiters.push(waiter);
    }

    fn drain_waiters(&self, into: &mut SmallVec<[Arc<Waiter>; 8]>) {
        let mut waiters = self.inner.waiters.lock();
        for waiter in waiters.drain(..) {
            if waiter.is_pending() {
                into.push(waiter);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stm::atomically;

    #[test]
    fn test_fresh_cell_is_at_version_zero() {
        let cell = TCell::new(7);
        assert_eq!(cell.read_now(), 7);
        assert_eq!(cell.version_now(), 0);
    }

    #[test]
    fn test_cell_ids_are_unique() {
        let a = TCell::new(0);
        let b = TCell::new(0);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_clone_shares_the_cell() {
        let a = TCell::new(1);
        let b = a.clone();
        assert_eq!(a.id(), b.id());

        atomically(|| a.write_tx(5)).unwrap();
        assert_eq!(b.read_now(), 5);
    }

    #[test]
    fn test_update_and_modify() {
        let cell = TCell::new(10);

        atomically(|| cell.update_tx(|n| n * 2)).unwrap();
        assert_eq!(cell.read_now(), 20);

        let prev = atomically(|| cell.modify_tx(|n| (n, n + 1))).unwrap();
        assert_eq!(prev, 20);
        assert_eq!(cell.read_now(), 21);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_read_tx_outside_transaction_panics() {
        let cell = TCell::new(0);
        let _ = cell.read_tx();
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_write_tx_outside_transaction_panics() {
        let cell = TCell::new(0);
        let _ = cell.write_tx(1);
    }
}

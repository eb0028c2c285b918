//! Reentrant transactional read/write lock
//!
//! A [`TRwLock`] is built from one cell and the engine's retry
//! mechanism; it has no locking or notification logic of its own. A
//! blocked acquire is an ordinary parked transaction, woken by the
//! release commit on the lock's cell.
//!
//! Ownership is tracked by explicit [`LockOwner`] ids rather than
//! thread identity: many lightweight tasks may share one OS thread, so
//! the owning task's id must be passed in, not looked up from
//! thread-local storage.
//!
//! Blocked acquirers of either mode are woken in the order they first
//! blocked (the engine's per-cell FIFO), so the lock is starvation-free
//! but grants no writer priority over readers that arrive later.

use rustc_hash::FxHashMap;

use crate::cell::TCell;
use crate::stm::{atomically, retry, InterruptToken, StmResult};

/// Identity of a lock-holding task, allocated explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner(u64);

impl LockOwner {
    /// Allocate a fresh owner id. Tasks typically allocate one at spawn
    /// time and use it for every lock interaction.
    #[must_use]
    pub fn fresh() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Default)]
struct LockState {
    /// Per-owner read hold counts.
    readers: FxHashMap<LockOwner, usize>,
    /// Writing owner and its reentrant depth.
    writer: Option<(LockOwner, usize)>,
}

/// A reentrant transactional read/write lock.
///
/// An owner holding the write lock may acquire the read lock (and vice
/// versa when it is the sole reader) without blocking itself. Distinct
/// owners exclude each other in the usual read/write way. Cloning
/// yields another handle to the same lock.
#[derive(Clone)]
pub struct TRwLock {
    state: TCell<LockState>,
}

impl Default for TRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl TRwLock {
    /// Create an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: TCell::new(LockState::default()),
        }
    }

    /// Acquire a read hold for `owner`, retrying while a different
    /// owner holds the write lock. Reentrant: repeated acquires stack.
    pub fn acquire_read(&self, owner: LockOwner) -> StmResult<()> {
        let mut state = self.state.read_tx()?;
        match state.writer {
            Some((writing, _)) if writing != owner => retry(),
            _ => {
                *state.readers.entry(owner).or_insert(0) += 1;
                self.state.write_tx(state)
            }
        }
    }

    /// Acquire the write lock for `owner`, retrying while another owner
    /// holds either mode. Reentrant: repeated acquires deepen the hold,
    /// and the sole reader may upgrade itself.
    pub fn acquire_write(&self, owner: LockOwner) -> StmResult<()> {
        let mut state = self.state.read_tx()?;
        match state.writer {
            Some((writing, depth)) if writing == owner => {
                state.writer = Some((writing, depth + 1));
                self.state.write_tx(state)
            }
            Some(_) => retry(),
            None => {
                let other_readers = state.readers.keys().any(|held| *held != owner);
                if other_readers {
                    retry()
                } else {
                    state.writer = Some((owner, 1));
                    self.state.write_tx(state)
                }
            }
        }
    }

    /// Release one read hold for `owner`. The release commit wakes
    /// retrying acquirers.
    ///
    /// # Panics
    ///
    /// Panics if `owner` holds no read lock; an unbalanced release is a
    /// structural bug.
    pub fn release_read(&self, owner: LockOwner) -> StmResult<()> {
        let mut state = self.state.read_tx()?;
        let count = state
            .readers
            .get_mut(&owner)
            .expect("release_read by an owner holding no read lock");
        *count -= 1;
        if *count == 0 {
            state.readers.remove(&owner);
        }
        self.state.write_tx(state)
    }

    /// Release one write hold for `owner`; at depth zero the write lock
    /// clears. The release commit wakes retrying acquirers.
    ///
    /// # Panics
    ///
    /// Panics if `owner` does not hold the write lock.
    pub fn release_write(&self, owner: LockOwner) -> StmResult<()> {
        let mut state = self.state.read_tx()?;
        match state.writer {
            Some((writing, depth)) if writing == owner => {
                state.writer = if depth == 1 {
                    None
                } else {
                    Some((writing, depth - 1))
                };
                self.state.write_tx(state)
            }
            _ => panic!("release_write by an owner not holding the write lock"),
        }
    }

    /// Whether any owner holds a read lock.
    pub fn read_locked(&self) -> StmResult<bool> {
        Ok(!self.state.read_tx()?.readers.is_empty())
    }

    /// Whether any owner holds the write lock.
    pub fn write_locked(&self) -> StmResult<bool> {
        Ok(self.state.read_tx()?.writer.is_some())
    }

    /// `owner`'s read hold count.
    pub fn read_count(&self, owner: LockOwner) -> StmResult<usize> {
        Ok(self.state.read_tx()?.readers.get(&owner).copied().unwrap_or(0))
    }

    /// The current writer's reentrant depth, or zero when unlocked.
    pub fn write_depth(&self) -> StmResult<usize> {
        Ok(self.state.read_tx()?.writer.map_or(0, |(_, depth)| depth))
    }

    /// Block until the read lock is acquired, returning a guard that
    /// releases it on drop. Must be called outside any transaction.
    pub fn read_guard(&self, owner: LockOwner) -> TRwLockReadGuard {
        atomically(|| self.acquire_read(owner)).expect("acquire_read cannot fail");
        TRwLockReadGuard {
            lock: self.clone(),
            owner,
        }
    }

    /// Interruptible [`TRwLock::read_guard`]; returns
    /// [`crate::StmError::Interrupted`] if `token` fires while blocked.
    pub fn read_guard_or_interrupt(
        &self,
        token: &InterruptToken,
        owner: LockOwner,
    ) -> StmResult<TRwLockReadGuard> {
        crate::stm::atomically_or_interrupt(token, || self.acquire_read(owner))?;
        Ok(TRwLockReadGuard {
            lock: self.clone(),
            owner,
        })
    }

    /// Block until the write lock is acquired, returning a guard that
    /// releases it on drop. Must be called outside any transaction.
    pub fn write_guard(&self, owner: LockOwner) -> TRwLockWriteGuard {
        atomically(|| self.acquire_write(owner)).expect("acquire_write cannot fail");
        TRwLockWriteGuard {
            lock: self.clone(),
            owner,
        }
    }

    /// Interruptible [`TRwLock::write_guard`].
    pub fn write_guard_or_interrupt(
        &self,
        token: &InterruptToken,
        owner: LockOwner,
    ) -> StmResult<TRwLockWriteGuard> {
        crate::stm::atomically_or_interrupt(token, || self.acquire_write(owner))?;
        Ok(TRwLockWriteGuard {
            lock: self.clone(),
            owner,
        })
    }

    /// Run `f` under the read lock, releasing on every exit path.
    pub fn with_read<R>(&self, owner: LockOwner, f: impl FnOnce() -> R) -> R {
        let _guard = self.read_guard(owner);
        f()
    }

    /// Run `f` under the write lock, releasing on every exit path.
    pub fn with_write<R>(&self, owner: LockOwner, f: impl FnOnce() -> R) -> R {
        let _guard = self.write_guard(owner);
        f()
    }
}

/// Releases one read hold on drop. Do not drop inside a transaction.
#[must_use = "the read lock is released when the guard is dropped"]
pub struct TRwLockReadGuard {
    lock: TRwLock,
    owner: LockOwner,
}

impl Drop for TRwLockReadGuard {
    fn drop(&mut self) {
        let _ = atomically(|| self.lock.release_read(self.owner));
    }
}

/// Releases one write hold on drop. Do not drop inside a transaction.
#[must_use = "the write lock is released when the guard is dropped"]
pub struct TRwLockWriteGuard {
    lock: TRwLock,
    owner: LockOwner,
}

impl Drop for TRwLockWriteGuard {
    fn drop(&mut self) {
        let _ = atomically(|| self.lock.release_write(self.owner));
    }
}

//! Transaction engine
//!
//! The engine runs transaction bodies against a journal of buffered
//! reads and writes, validates the journal optimistically at commit
//! time, and applies every buffered write as one indivisible step. No
//! partial set of a transaction's writes is ever observable.
//!
//! # Running transactions
//!
//! ```ignore
//! let from = TCell::new(100);
//! let to = TCell::new(0);
//!
//! atomically(|| {
//!     let a = from.read_tx()?;
//!     let b = to.read_tx()?;
//!     from.write_tx(a - 30)?;
//!     to.write_tx(b + 30)
//! });
//! ```
//!
//! A body must be free of side effects other than cell operations: the
//! engine re-runs it from scratch whenever validation fails, invisibly
//! to the caller. A running attempt may transiently observe state that a
//! concurrent commit later invalidates; commit-time validation discards
//! such attempts before any effect escapes.
//!
//! # Retry and or_else
//!
//! [`retry`] abandons the current attempt because a precondition is
//! false. The transaction parks as a waiter on every cell it read and
//! re-runs only after some commit touches one of them. [`or_else`] tries
//! an alternative body in the same attempt before blocking.
//!
//! # Host schedulers
//!
//! [`atomically`] blocks the calling thread. Runtimes that multiplex
//! lightweight tasks onto few threads use [`attempt`] instead: it never
//! blocks, returning a [`ResumeToken`] when the transaction must wait.
//! The scheduler installs a wake callback on the token, parks the task,
//! and re-calls [`attempt`] with the same body once woken.

use std::any::Any;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::cell::{CellId, CellOps, TCell};

// ============================================================================
// Results and errors
// ============================================================================

/// Result type for transactional operations.
pub type StmResult<T> = Result<T, StmError>;

/// Errors produced by transactional operations.
///
/// Only [`StmError::Closed`] and [`StmError::Interrupted`] can escape
/// [`atomically`]; [`StmError::Retry`] is control flow consumed by the
/// engine. Commit conflicts are handled internally and have no error
/// representation at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StmError {
    /// The transaction must block until a cell it read changes.
    ///
    /// Raised by [`retry`]; never observed by callers of
    /// [`atomically`].
    #[error("transaction must block and retry")]
    Retry,
    /// The target structure has been shut down.
    #[error("transactional structure is shut down")]
    Closed,
    /// The owning task was interrupted while running or parked.
    ///
    /// Nothing was committed; no compensating action is needed.
    #[error("transaction interrupted")]
    Interrupted,
}

/// Abandon the current attempt until a cell in its read set changes.
///
/// A retry with an empty read set can never be woken by a commit; it
/// parks until interrupted.
pub fn retry<T>() -> StmResult<T> {
    Err(StmError::Retry)
}

/// Retry unless `condition` holds.
pub fn check(condition: bool) -> StmResult<()> {
    if condition {
        Ok(())
    } else {
        retry()
    }
}

/// Run `first`; if it retries, run `second` in the same attempt.
///
/// Writes buffered by `first` before its retry are rolled back; its
/// reads remain in the journal, so the combined attempt blocks on (and
/// validates against) cells read by either branch. The attempt parks
/// only if both branches retry.
///
/// # Example
///
/// ```ignore
/// // Take from `a`, else from `b`, blocking only if both are empty.
/// let item = atomically(|| or_else(|| a.take(), || b.take()))?;
/// ```
pub fn or_else<T>(
    first: impl FnOnce() -> StmResult<T>,
    second: impl FnOnce() -> StmResult<T>,
) -> StmResult<T> {
    let snapshot = CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let txn = slot.as_mut().expect(OUTSIDE_TXN);
        txn.writes.clone()
    });
    match first() {
        Err(StmError::Retry) => {
            CURRENT.with(|slot| {
                let mut slot = slot.borrow_mut();
                let txn = slot.as_mut().expect(OUTSIDE_TXN);
                txn.writes = snapshot;
            });
            second()
        }
        result => result,
    }
}

// ============================================================================
// Waiters
// ============================================================================

static WAITER_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaiterState {
    Pending,
    Woken,
    Interrupted,
}

struct WaiterSlot {
    state: WaiterState,
    on_wake: Option<Box<dyn FnOnce() + Send>>,
}

/// A parked transaction awaiting a relevant commit.
///
/// One-shot: the first transition out of `Pending` wins, later wakes
/// are no-ops. Cells purge non-pending entries from their waiter lists
/// lazily, which is how deregistration on wake or interruption happens
/// without back-references from waiters to cells.
pub(crate) struct Waiter {
    /// Registration order. Commits wake intersecting waiters in
    /// increasing `seq`, so the earliest-blocked transaction on a cell
    /// is resumed first.
    seq: u64,
    slot: Mutex<WaiterSlot>,
    condvar: Condvar,
}

impl Waiter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seq: WAITER_SEQ.fetch_add(1, Ordering::Relaxed),
            slot: Mutex::new(WaiterSlot {
                state: WaiterState::Pending,
                on_wake: None,
            }),
            condvar: Condvar::new(),
        })
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.slot.lock().state == WaiterState::Pending
    }

    pub(crate) fn wake(&self) {
        self.finish(WaiterState::Woken);
    }

    fn interrupt(&self) {
        self.finish(WaiterState::Interrupted);
    }

    fn finish(&self, next: WaiterState) {
        let callback = {
            let mut slot = self.slot.lock();
            if slot.state != WaiterState::Pending {
                return;
            }
            slot.state = next;
            slot.on_wake.take()
        };
        self.condvar.notify_all();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn set_callback(&self, f: impl FnOnce() + Send + 'static) -> bool {
        let mut slot = self.slot.lock();
        if slot.state == WaiterState::Pending {
            slot.on_wake = Some(Box::new(f));
            true
        } else {
            false
        }
    }

    fn block(&self) -> WaiterState {
        let mut slot = self.slot.lock();
        while slot.state == WaiterState::Pending {
            self.condvar.wait(&mut slot);
        }
        slot.state
    }
}

/// Handle to a suspended transaction, returned by [`attempt`].
///
/// The host scheduler installs a wake callback and parks the owning
/// task; a commit touching any cell the transaction read fires the
/// callback, after which the scheduler re-runs the body via
/// [`attempt`].
pub struct ResumeToken {
    waiter: Arc<Waiter>,
}

impl ResumeToken {
    /// Install the callback to run when this transaction is woken.
    ///
    /// Returns `false` without installing when the waiter was already
    /// woken or interrupted between suspension and this call; the
    /// scheduler must then resume the task immediately instead of
    /// parking it.
    pub fn on_wake(&self, f: impl FnOnce() + Send + 'static) -> bool {
        self.waiter.set_callback(f)
    }

    /// Whether the transaction is still parked.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.waiter.is_pending()
    }

    /// Block the calling thread until woken or interrupted.
    fn block(&self, token: Option<&InterruptToken>) -> WaiterState {
        if let Some(token) = token {
            *token.inner.parked.lock() = Some(Arc::clone(&self.waiter));
            if token.is_interrupted() {
                token.inner.parked.lock().take();
                self.waiter.interrupt();
            }
        }
        let outcome = self.waiter.block();
        if let Some(token) = token {
            token.inner.parked.lock().take();
        }
        outcome
    }
}

// ============================================================================
// Interruption
// ============================================================================

#[derive(Default)]
struct InterruptInner {
    flag: AtomicBool,
    /// Waiter currently parked on behalf of the owning task, if any.
    parked: Mutex<Option<Arc<Waiter>>>,
}

/// Cancellation signal for transactions run with
/// [`atomically_or_interrupt`].
///
/// Interrupting a transaction that is mid-body discards its journal
/// with no effect; interrupting a parked one deregisters its waiter and
/// unwinds it. Either way the caller observes
/// [`StmError::Interrupted`].
#[derive(Clone, Default)]
pub struct InterruptToken {
    inner: Arc<InterruptInner>,
}

impl InterruptToken {
    /// Create a token in the non-interrupted state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal interruption.
    ///
    /// Idempotent. Takes effect at the transaction's next cell
    /// operation or commit, or immediately if it is parked.
    pub fn interrupt(&self) {
        self.inner.flag.store(true, Ordering::Release);
        let parked = self.inner.parked.lock().take();
        if let Some(waiter) = parked {
            waiter.interrupt();
        }
    }

    /// Whether [`InterruptToken::interrupt`] has been called.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }
}

// ============================================================================
// The journal
// ============================================================================

struct ReadEntry {
    ops: Arc<dyn CellOps>,
    /// Version at the time of the first read this attempt.
    version: u64,
    /// Committed value as first seen, so repeated reads inside one
    /// attempt stay stable.
    value: Arc<dyn Any + Send + Sync>,
}

#[derive(Clone)]
struct WriteEntry {
    ops: Arc<dyn CellOps>,
    value: Arc<dyn Any + Send + Sync>,
}

/// Per-attempt transaction state. Writes are buffered here and only
/// reach cells through [`Txn::commit`].
pub(crate) struct Txn {
    reads: FxHashMap<CellId, ReadEntry>,
    writes: FxHashMap<CellId, WriteEntry>,
    interrupt: Option<InterruptToken>,
}

impl Txn {
    fn new(interrupt: Option<InterruptToken>) -> Self {
        Self {
            reads: FxHashMap::default(),
            writes: FxHashMap::default(),
            interrupt,
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(InterruptToken::is_interrupted)
    }

    pub(crate) fn read<T: Clone + Send + Sync + 'static>(
        &mut self,
        cell: &TCell<T>,
    ) -> StmResult<T> {
        if self.interrupted() {
            return Err(StmError::Interrupted);
        }
        let id = cell.id();

        // Read-your-writes.
        if let Some(entry) = self.writes.get(&id) {
            if let Some(value) = entry.value.downcast_ref::<T>() {
                return Ok(value.clone());
            }
        }

        // Stable repeated reads.
        if let Some(entry) = self.reads.get(&id) {
            if let Some(value) = entry.value.downcast_ref::<T>() {
                return Ok(value.clone());
            }
        }

        let (value, version) = cell.load();
        self.reads.insert(
            id,
            ReadEntry {
                ops: Arc::new(cell.clone()),
                version,
                value: Arc::new(value.clone()),
            },
        );
        Ok(value)
    }

    pub(crate) fn write<T: Clone + Send + Sync + 'static>(
        &mut self,
        cell: &TCell<T>,
        value: T,
    ) -> StmResult<()> {
        if self.interrupted() {
            return Err(StmError::Interrupted);
        }
        self.writes.insert(
            cell.id(),
            WriteEntry {
                ops: Arc::new(cell.clone()),
                value: Arc::new(value),
            },
        );
        Ok(())
    }

    /// Every read cell still carries the version recorded at read time.
    fn validate(&self) -> bool {
        self.reads
            .values()
            .all(|entry| entry.ops.current_version() == entry.version)
    }

    /// Validate and, on success, apply all buffered writes as one
    /// indivisible step, then wake intersecting waiters in registration
    /// order. Returns `false` on conflict.
    fn commit(self) -> bool {
        let woken = {
            let _guard = COMMIT_LOCK.lock();
            if !self.validate() {
                tracing::trace!("commit conflict, re-running body");
                return false;
            }
            let mut woken: SmallVec<[Arc<Waiter>; 8]> = SmallVec::new();
            let written = self.writes.len();
            for entry in self.writes.into_values() {
                entry.ops.commit_value(entry.value);
                entry.ops.drain_waiters(&mut woken);
            }
            // A waiter registered on several written cells is drained
            // once per cell.
            woken.sort_by_key(|w| w.seq());
            woken.dedup_by_key(|w| w.seq());
            let seq = COMMIT_SEQ.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(commit = seq, cells = written, woken = woken.len(), "committed");
            woken
        };
        // FIFO by registration sequence: earliest-blocked first.
        for waiter in woken {
            waiter.wake();
        }
        true
    }
}

/// Global commit critical section. Commits are strictly serialized:
/// validation and write application happen inside it, so no commit
/// observes another mid-application.
static COMMIT_LOCK: Mutex<()> = Mutex::new(());

static COMMIT_SEQ: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// Ambient transaction context
// ============================================================================

thread_local! {
    static CURRENT: RefCell<Option<Txn>> = const { RefCell::new(None) };
}

const OUTSIDE_TXN: &str = "transactional operation outside of atomically";

/// Run `f` against the ambient transaction.
///
/// Panics outside a transaction: cell access without an enclosing
/// `atomically` is a structural bug, not a recoverable error.
pub(crate) fn with_txn<R>(f: impl FnOnce(&mut Txn) -> StmResult<R>) -> StmResult<R> {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let txn = slot.as_mut().expect(OUTSIDE_TXN);
        f(txn)
    })
}

/// Installs a fresh journal as the ambient transaction and removes it
/// again on drop, so a panicking body never leaks an active journal.
struct TxnScope;

impl TxnScope {
    fn enter(interrupt: Option<InterruptToken>) -> Self {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            assert!(
                slot.is_none(),
                "nested atomically: compose with StmResult bodies instead"
            );
            *slot = Some(Txn::new(interrupt));
        });
        TxnScope
    }

    fn take(self) -> Txn {
        CURRENT.with(|slot| slot.borrow_mut().take()).expect(OUTSIDE_TXN)
    }
}

impl Drop for TxnScope {
    fn drop(&mut self) {
        CURRENT.with(|slot| {
            slot.borrow_mut().take();
        });
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Outcome of one [`attempt`] call.
pub enum Attempt<T> {
    /// The body ran to completion. Conflicts were already re-run
    /// internally; the result is the committed value, a `Closed`
    /// failure, or `Interrupted`.
    Completed(StmResult<T>),
    /// The body retried and is parked as a waiter on every cell it
    /// read. Resume by re-calling [`attempt`] after the token fires.
    Suspended(ResumeToken),
}

/// Run one transaction to completion or suspension, without blocking.
///
/// Loops internally on commit conflicts. On explicit retry the
/// transaction is registered as a waiter on its read set and a
/// [`ResumeToken`] is returned; the caller parks the task and re-calls
/// `attempt` with the same body when the token fires.
pub fn attempt<T, F>(token: Option<&InterruptToken>, body: &F) -> Attempt<T>
where
    F: Fn() -> StmResult<T>,
{
    loop {
        if token.is_some_and(InterruptToken::is_interrupted) {
            return Attempt::Completed(Err(StmError::Interrupted));
        }
        let scope = TxnScope::enter(token.cloned());
        let result = body();
        let txn = scope.take();
        match result {
            Ok(value) => {
                if txn.commit() {
                    return Attempt::Completed(Ok(value));
                }
            }
            Err(StmError::Retry) => {
                // Register on every cell read this attempt, then
                // re-validate: a commit that slipped in between the
                // reads and the registration must not be missed.
                let waiter = Waiter::new();
                for entry in txn.reads.values() {
                    entry.ops.register_waiter(Arc::clone(&waiter));
                }
                if !txn.validate() {
                    waiter.wake();
                    continue;
                }
                tracing::trace!(seq = waiter.seq(), cells = txn.reads.len(), "parked");
                return Attempt::Suspended(ResumeToken { waiter });
            }
            Err(err) => return Attempt::Completed(Err(err)),
        }
    }
}

/// Execute a transaction atomically, blocking the calling thread when
/// the body retries.
///
/// Conflicts with concurrent commits re-run the body invisibly. The
/// only error that can escape is [`StmError::Closed`], raised by
/// operations on shut-down structures.
///
/// # Example
///
/// ```ignore
/// let counter = TCell::new(0);
///
/// atomically(|| counter.update_tx(|n| n + 1));
/// ```
///
/// # Panics
///
/// Panics when called inside another transaction. Compose nested logic
/// as plain `StmResult` bodies instead.
pub fn atomically<T, F>(body: F) -> StmResult<T>
where
    F: Fn() -> StmResult<T>,
{
    run_blocking(None, &body)
}

/// Like [`atomically`], but unwound with [`StmError::Interrupted`] when
/// `token` fires while the body runs or while it is parked.
pub fn atomically_or_interrupt<T, F>(token: &InterruptToken, body: F) -> StmResult<T>
where
    F: Fn() -> StmResult<T>,
{
    run_blocking(Some(token), &body)
}

fn run_blocking<T, F>(token: Option<&InterruptToken>, body: &F) -> StmResult<T>
where
    F: Fn() -> StmResult<T>,
{
    loop {
        match attempt(token, body) {
            Attempt::Completed(result) => return result,
            Attempt::Suspended(resume) => {
                if resume.block(token) == WaiterState::Interrupted {
                    return Err(StmError::Interrupted);
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_read_and_write() {
        let cell = TCell::new(42);

        assert_eq!(atomically(|| cell.read_tx()), Ok(42));

        atomically(|| cell.write_tx(100)).unwrap();
        assert_eq!(atomically(|| cell.read_tx()), Ok(100));
    }

    #[test]
    fn test_read_your_writes() {
        let cell = TCell::new(0);

        let seen = atomically(|| {
            cell.write_tx(42)?;
            cell.read_tx()
        });
        assert_eq!(seen, Ok(42));
    }

    #[test]
    fn test_repeated_reads_are_stable() {
        let cell = TCell::new(1);

        atomically(|| {
            let a = cell.read_tx()?;
            let b = cell.read_tx()?;
            assert_eq!(a, b);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_multi_cell_transfer_is_atomic() {
        let from = TCell::new(100);
        let to = TCell::new(200);

        atomically(|| {
            let a = from.read_tx()?;
            let b = to.read_tx()?;
            from.write_tx(a - 50)?;
            to.write_tx(b + 50)
        })
        .unwrap();

        assert_eq!(from.read_now(), 50);
        assert_eq!(to.read_now(), 250);
    }

    #[test]
    fn test_version_steps_by_one_per_commit() {
        let cell = TCell::new(0);
        assert_eq!(cell.version_now(), 0);

        atomically(|| cell.write_tx(1)).unwrap();
        assert_eq!(cell.version_now(), 1);

        // One commit, one version step, even with repeated writes.
        atomically(|| {
            cell.write_tx(2)?;
            cell.write_tx(3)
        })
        .unwrap();
        assert_eq!(cell.version_now(), 2);
        assert_eq!(cell.read_now(), 3);
    }

    #[test]
    fn test_concurrent_increments_are_isolated() {
        let counter = TCell::new(0);
        let threads: Vec<_> = (0..10)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        atomically(|| counter.update_tx(|n| n + 1)).unwrap();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(counter.read_now(), 1000);
    }

    #[test]
    fn test_conflict_reruns_the_body_invisibly() {
        let cell = TCell::new(0);
        let attempts = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let writer = {
            let cell = cell.clone();
            thread::spawn(move || {
                rx.recv().unwrap();
                atomically(|| cell.write_tx(7)).unwrap();
                done_tx.send(()).unwrap();
            })
        };

        let result = atomically(|| {
            let n = cell.read_tx()?;
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                // First attempt: arrange a conflicting commit before we
                // reach our own.
                tx.send(()).unwrap();
                done_rx.recv().unwrap();
            }
            Ok(n)
        });

        writer.join().unwrap();
        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_or_else_falls_back() {
        let cell = TCell::new(0);

        let result = atomically(|| {
            or_else(
                || {
                    let n = cell.read_tx()?;
                    check(n != 0)?;
                    Ok(n)
                },
                || Ok(-1),
            )
        });
        assert_eq!(result, Ok(-1));
    }

    #[test]
    fn test_or_else_rolls_back_first_branch_writes() {
        let cell = TCell::new(0);

        let seen = atomically(|| {
            or_else(
                || {
                    cell.write_tx(99)?;
                    retry()
                },
                || cell.read_tx(),
            )
        });
        assert_eq!(seen, Ok(0));
        assert_eq!(cell.read_now(), 0);
    }

    #[test]
    fn test_or_else_keeps_committed_result() {
        let a = TCell::new(1);

        let result = atomically(|| or_else(|| a.read_tx(), || Ok(-1)));
        assert_eq!(result, Ok(1));
    }

    #[test]
    fn test_check_passes_when_true() {
        let cell = TCell::new(10);

        let result = atomically(|| {
            let n = cell.read_tx()?;
            check(n > 5)?;
            Ok(n)
        });
        assert_eq!(result, Ok(10));
    }

    #[test]
    #[should_panic(expected = "nested atomically")]
    fn test_nested_atomically_panics() {
        let cell = TCell::new(0);
        let _ = atomically(|| {
            let _ = atomically(|| cell.read_tx());
            Ok(())
        });
    }

    #[test]
    fn test_panicking_body_commits_nothing() {
        let cell = TCell::new(5);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: StmResult<()> = atomically(|| {
                cell.write_tx(99)?;
                panic!("boom");
            });
        }));
        assert!(outcome.is_err());
        assert_eq!(cell.read_now(), 5);

        // The ambient context was cleared on unwind.
        assert_eq!(atomically(|| cell.read_tx()), Ok(5));
    }

    #[test]
    fn test_closed_escapes_atomically() {
        let result: StmResult<()> = atomically(|| Err(StmError::Closed));
        assert_eq!(result, Err(StmError::Closed));
    }

    #[test]
    fn test_interrupted_token_stops_before_running() {
        let cell = TCell::new(0);
        let token = InterruptToken::new();
        token.interrupt();

        let result = atomically_or_interrupt(&token, || cell.read_tx());
        assert_eq!(result, Err(StmError::Interrupted));
    }

    #[test]
    fn test_interrupt_wakes_a_parked_transaction() {
        let cell = TCell::new(0);
        let token = InterruptToken::new();

        let handle = {
            let cell = cell.clone();
            let token = token.clone();
            thread::spawn(move || {
                atomically_or_interrupt(&token, || {
                    let n = cell.read_tx()?;
                    check(n != 0)?;
                    Ok(n)
                })
            })
        };

        thread::sleep(Duration::from_millis(50));
        token.interrupt();
        assert_eq!(handle.join().unwrap(), Err(StmError::Interrupted));
        // The cell was never committed to.
        assert_eq!(cell.version_now(), 0);
    }

    #[test]
    fn test_blocked_retry_woken_by_commit() {
        let cell = TCell::new(0);

        let taker = {
            let cell = cell.clone();
            thread::spawn(move || {
                atomically(|| {
                    let n = cell.read_tx()?;
                    check(n != 0)?;
                    Ok(n)
                })
            })
        };

        thread::sleep(Duration::from_millis(50));
        atomically(|| cell.write_tx(42)).unwrap();
        assert_eq!(taker.join().unwrap(), Ok(42));
    }

    #[test]
    fn test_attempt_suspends_and_resumes() {
        let cell = TCell::new(0);
        let body = {
            let cell = cell.clone();
            move || {
                let n = cell.read_tx()?;
                check(n != 0)?;
                Ok(n)
            }
        };

        let resume = match attempt(None, &body) {
            Attempt::Suspended(resume) => resume,
            Attempt::Completed(_) => panic!("expected suspension"),
        };
        assert!(resume.is_pending());

        let fired = Arc::new(AtomicBool::new(false));
        let fired_cb = Arc::clone(&fired);
        assert!(resume.on_wake(move || fired_cb.store(true, Ordering::SeqCst)));

        atomically(|| cell.write_tx(9)).unwrap();
        assert!(fired.load(Ordering::SeqCst));
        assert!(!resume.is_pending());

        match attempt(None, &body) {
            Attempt::Completed(result) => assert_eq!(result, Ok(9)),
            Attempt::Suspended(_) => panic!("expected completion"),
        }
    }

    #[test]
    fn test_on_wake_after_wake_reports_missed() {
        let cell = TCell::new(0);
        let body = {
            let cell = cell.clone();
            move || {
                let n = cell.read_tx()?;
                check(n != 0)?;
                Ok(n)
            }
        };

        let resume = match attempt(None, &body) {
            Attempt::Suspended(resume) => resume,
            Attempt::Completed(_) => panic!("expected suspension"),
        };

        // Wake happens before the scheduler installs its callback.
        atomically(|| cell.write_tx(1)).unwrap();
        assert!(!resume.on_wake(|| unreachable!("must not be stored")));
    }
}

//! Transactional shared-state primitives
//!
//! This crate provides software transactional memory for a cooperatively
//! scheduled runtime, plus four concurrent structures built entirely on
//! top of it.
//!
//! # Components
//!
//! - [`TCell`] - versioned transactional cell, the unit of shared state
//! - [`atomically`] - all-or-nothing execution of cell reads and writes
//! - [`TQueue`] - FIFO queue with bounded/unbounded/dropping/sliding
//!   overflow policies
//! - [`THub`] - broadcast hub fanning published items out to
//!   independently paced subscriber queues
//! - [`TWatch`] - observable cell whose committed writes are also
//!   delivered as a change stream
//! - [`TRwLock`] - reentrant read/write lock driven by transactional
//!   retry
//!
//! The queue, hub, watch and lock contain no locking or notification
//! logic of their own. Every operation they expose is a transaction body
//! run by the engine against one or more cells, so there is exactly one
//! commit protocol to reason about for the whole crate.
//!
//! # Blocking
//!
//! A transaction that finds a precondition false (an empty queue, a held
//! lock) calls [`retry`], which parks the caller until another commit
//! touches a cell it read. Hosts that multiplex many lightweight tasks
//! onto few threads drive the engine through the non-blocking
//! [`attempt`] API instead of the thread-blocking [`atomically`].

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod cell;
pub mod hub;
pub mod lock;
pub mod queue;
pub mod stm;
pub mod watch;

pub use cell::{CellId, TCell};
pub use hub::{Subscription, THub};
pub use lock::{LockOwner, TRwLock, TRwLockReadGuard, TRwLockWriteGuard};
pub use queue::{Capacity, OverflowPolicy, TQueue};
pub use stm::{
    atomically, atomically_or_interrupt, attempt, check, or_else, retry, Attempt, InterruptToken,
    ResumeToken, StmError, StmResult,
};
pub use watch::{Changes, TWatch};

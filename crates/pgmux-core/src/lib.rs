//! Core types and traits for pgmux.
//!
//! This crate provides the vocabulary shared by the scheduler and its
//! collaborators:
//!
//! - `Transaction` trait for units of work the scheduler batches and retries
//! - `Outcome` and `Mailbox` for producer notification
//! - `Clock` for injectable monotonic time
//! - `Error` taxonomy

pub mod clock;
pub mod error;
pub mod outcome;
pub mod transaction;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use outcome::{Dispatcher, Mailbox, NullMailbox, Outcome};
pub use transaction::{
    QueryTransaction, Statement, Transaction, TransactionId, TransactionIds, TransactionKind,
    TransactionStatus,
};

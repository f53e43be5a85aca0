//! pgmux - non-blocking database transaction scheduling.
//!
//! pgmux accepts transactions from many producers, batches them, runs them
//! over a primary and an optional secondary connection pool, and reports
//! exactly one outcome per submission back to its producer:
//!
//! - Admission queue with optional capacity and batch merging
//! - Retry after an interval and failover to a secondary pool
//! - Wait timeouts with cooperative cancel, and reset of wedged connections
//! - Reconnect with a per-connection administrative replay (prepared
//!   statements, search path, init queries)
//!
//! # Quick Start
//!
//! ```ignore
//! use pgmux::prelude::*;
//! use std::sync::Arc;
//!
//! let dispatcher = Arc::new(Dispatcher::new());
//! let outcomes = dispatcher.register("billing");
//!
//! let config = WorkerConfig::new()
//!     .retry_enabled(true)
//!     .failover_to_secondary(true)
//!     .search_paths(vec!["billing".into()]);
//! let mut worker = Worker::new("billing", config, dispatcher)?;
//! worker.create_pool(PoolRole::Primary, PoolConfig::new("db1", "app", 4), &factory)?;
//! worker.create_pool(PoolRole::Secondary, PoolConfig::new("db2", "app", 2), &factory)?;
//!
//! let runner = WorkerRunner::spawn(worker)?;
//! let tx = QueryTransaction::chained()
//!     .exec(Statement::sql("UPDATE accounts SET balance = balance - 10 WHERE id = 1"))
//!     .exec(Statement::sql("UPDATE accounts SET balance = balance + 10 WHERE id = 2"));
//! runner.handle().submit(Box::new(tx), "billing", "transfer-1")?;
//!
//! match outcomes.recv()? {
//!     Outcome::Result { value, .. } => println!("{value}"),
//!     Outcome::Error { message, .. } => eprintln!("failed: {message}"),
//!     Outcome::Timeout { .. } => eprintln!("timed out"),
//! }
//! ```
//!
//! Drivers plug in through [`ConnectionDriver`] and [`DriverFactory`];
//! [`mock`] provides a scriptable in-memory driver for tests.

pub use pgmux_core::{
    Clock, Dispatcher, Error, Mailbox, ManualClock, NullMailbox, Outcome, QueryTransaction,
    Result, Statement, SystemClock, Transaction, TransactionId, TransactionIds, TransactionKind,
    TransactionStatus,
};
pub use pgmux_core::error::{
    ConfigError, ConnectionError, ConnectionErrorKind, PoolError, PoolErrorKind,
    TransactionError, TransactionErrorKind,
};
pub use pgmux_pool::{
    Connection, ConnectionDriver, ConnectionEvent, ConnectionId, ConnectionPool, ConnectionStats,
    ConnectionStatus, DriverEvent, DriverFactory, NoopReactor, PipelineStatus, PoolConfig,
    PoolRole, PoolStats, PreparedStatementConfig, Reactor, Readiness, SocketHandle,
    SocketInterest, Worker, WorkerConfig, WorkerHandle, WorkerMetrics, WorkerRunner, WorkerStats,
};
pub use pgmux_pool::mock;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use pgmux::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Transactions
        QueryTransaction,
        Statement,
        Transaction,
        TransactionKind,
        // Outcomes
        Dispatcher,
        Mailbox,
        Outcome,
        // Scheduling
        PoolConfig,
        PoolRole,
        PreparedStatementConfig,
        Worker,
        WorkerConfig,
        WorkerHandle,
        WorkerRunner,
        // Drivers
        ConnectionDriver,
        DriverFactory,
        Readiness,
        // Errors
        Error,
        Result,
    };
}

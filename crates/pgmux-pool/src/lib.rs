//! Connection pools and the transaction scheduler for pgmux.
//!
//! `pgmux-pool` provides:
//!
//! - `Connection`, a non-blocking state machine over a `ConnectionDriver`
//! - `ConnectionPool`, a fixed set of connections for one role
//! - `Worker`, which batches, dispatches, retries and times out
//!   transactions over a primary and an optional secondary pool
//! - `WorkerRunner`, which drives a worker on its own thread
//!
//! # Example
//!
//! ```rust,ignore
//! let dispatcher = Arc::new(Dispatcher::new());
//! let outcomes = dispatcher.register("billing");
//!
//! let config = WorkerConfig::new().retry_enabled(true).batch_size(1);
//! let mut worker = Worker::new("orders", config, dispatcher)?;
//! worker.create_pool(PoolRole::Primary, PoolConfig::new("db1", "app", 4), &factory)?;
//!
//! let runner = WorkerRunner::spawn(worker)?;
//! runner.handle().submit(Box::new(tx), "billing", "req-42")?;
//! let outcome = outcomes.recv()?;
//! ```

pub mod config;
pub mod connection;
pub mod driver;
pub mod mock;
pub mod pool;
pub mod reactor;
mod retry;
pub mod runner;
pub mod stats;
pub mod worker;

pub use config::{PoolConfig, PoolRole, PreparedStatementConfig, WorkerConfig};
pub use connection::{Connection, ConnectionEvent, ConnectionId, ConnectionStatus, PipelineStatus};
pub use driver::{
    ConnectionDriver, DriverEvent, DriverFactory, Readiness, SocketHandle, SocketInterest,
};
pub use pool::{ConnectionPool, ConnectionStats, PoolStats};
pub use reactor::{NoopReactor, Reactor};
pub use runner::{WorkerHandle, WorkerRunner};
pub use stats::{WorkerMetrics, WorkerStats};
pub use worker::Worker;

//! The wire-level collaborator behind a [`Connection`](crate::Connection).
//!
//! A driver owns one physical, non-blocking link to the database. It never
//! blocks and never runs its own loop: the connection calls into it when the
//! readiness multiplexer reports activity, and the driver answers with
//! [`DriverEvent`]s describing what happened.

use pgmux_core::{Result, Transaction};
use serde_json::Value;

/// Socket handle as known to the readiness multiplexer.
pub type SocketHandle = i32;

/// Readiness reported by the multiplexer, or a periodic check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Read,
    Write,
    ReadWrite,
    Error,
    /// No socket activity; let the driver look at its own state
    Check,
}

/// Interest change the driver asks the multiplexer to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketInterest {
    /// A new socket appeared
    New,
    /// The socket is going away
    Delete,
    Read,
    Write,
    ReadWrite,
}

/// What the driver observed while handling a call.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Socket(SocketInterest),
    /// The link is established and ready for work
    Connected,
    /// Connecting failed
    ConnectFailed(String),
    /// An established link dropped
    Disconnected,
    /// Connection-level protocol error that does not end the link
    ProtocolError(String),
    /// The current transaction reached the server
    Sent,
    /// The current transaction completed with `result`
    Finished(Value),
    /// The server rejected the current transaction
    Failed {
        message: String,
        code: Option<String>,
    },
    /// The pipeline lost synchronization; the current transaction must be
    /// abandoned
    PipelineDesync,
}

/// Non-blocking database link.
pub trait ConnectionDriver: Send {
    /// Start (re)establishing the link. An `Err` means the attempt failed
    /// before any I/O was started.
    fn reset(&mut self) -> Result<Vec<DriverEvent>>;

    /// Drop the link.
    fn close(&mut self);

    /// React to readiness. `current` is the transaction the connection is
    /// running, if any; the driver advances its cursor and status.
    fn poll(
        &mut self,
        readiness: Readiness,
        current: Option<&mut dyn Transaction>,
    ) -> Vec<DriverEvent>;

    /// Start sending `transaction`.
    fn send(&mut self, transaction: &mut dyn Transaction) -> Result<Vec<DriverEvent>>;

    /// Ask the server to cancel the running transaction.
    fn cancel(&mut self) -> bool;

    fn start_pipeline(&mut self) -> bool;

    fn exit_pipeline(&mut self) -> bool;

    /// Send a pipeline sync point.
    fn sync_pipeline(&mut self) -> bool;

    fn socket(&self) -> Option<SocketHandle>;
}

/// Creates drivers for a pool. Passed explicitly to pool construction so
/// real and mock drivers can coexist.
pub trait DriverFactory {
    /// `conninfo` carries credentials; `log_info` is safe to log.
    fn create(&self, conninfo: &str, log_info: &str) -> Box<dyn ConnectionDriver>;
}

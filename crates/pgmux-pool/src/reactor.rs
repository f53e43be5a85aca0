//! Hook into the external readiness multiplexer.
//!
//! Drivers announce socket interest changes; the worker forwards them here.
//! The multiplexer later reports readiness back through
//! [`Worker::on_readiness`](crate::Worker::on_readiness).

use std::io;

use parking_lot::Mutex;

use crate::connection::ConnectionId;
use crate::driver::{SocketHandle, SocketInterest};

pub trait Reactor: Send + Sync {
    /// Apply `interest` for the socket of `conn`. An error schedules the
    /// connection for reset.
    fn update(
        &self,
        conn: ConnectionId,
        socket: Option<SocketHandle>,
        interest: SocketInterest,
    ) -> io::Result<()>;
}

/// Reactor for drivers that need no registration (or tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReactor;

impl Reactor for NoopReactor {
    fn update(
        &self,
        _conn: ConnectionId,
        _socket: Option<SocketHandle>,
        _interest: SocketInterest,
    ) -> io::Result<()> {
        Ok(())
    }
}

/// Reactor that records every interest change, optionally failing them.
#[derive(Debug, Default)]
pub struct RecordingReactor {
    updates: Mutex<Vec<(ConnectionId, SocketInterest)>>,
    failing: Mutex<bool>,
}

impl RecordingReactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn updates(&self) -> Vec<(ConnectionId, SocketInterest)> {
        self.updates.lock().clone()
    }
}

impl Reactor for RecordingReactor {
    fn update(
        &self,
        conn: ConnectionId,
        _socket: Option<SocketHandle>,
        interest: SocketInterest,
    ) -> io::Result<()> {
        if *self.failing.lock() {
            return Err(io::Error::other("registration refused"));
        }
        self.updates.lock().push((conn, interest));
        Ok(())
    }
}

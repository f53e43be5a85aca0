//! Connection state machine.
//!
//! A [`Connection`] wraps one [`ConnectionDriver`] and tracks its status,
//! pipeline mode, and two transaction slots: the transaction currently
//! running and at most one planned follow-up. It never loops and never
//! blocks; the worker feeds it readiness through [`Connection::on_sock`]
//! and collects the resulting [`ConnectionEvent`]s with
//! [`Connection::take_events`].

use std::fmt;
use std::time::Instant;

use pgmux_core::{Error, Transaction, TransactionId, TransactionStatus};
use serde::Serialize;
use serde_json::Value;

use crate::config::PoolRole;
use crate::driver::{ConnectionDriver, DriverEvent, Readiness, SocketHandle, SocketInterest};

/// Position of a connection within a worker's pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId {
    pub role: PoolRole,
    pub index: usize,
}

impl ConnectionId {
    pub const fn new(role: PoolRole, index: usize) -> Self {
        Self { role, index }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role, self.index)
    }
}

/// Link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not connected, connecting, or failed
    Bad,
    /// Ready for queries
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Off,
    On,
}

/// Notifications a connection raises for its worker.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Socket interest changed
    Socket(SocketInterest),
    Connected,
    ConnectionFailed(String),
    Disconnected,
    /// A reset was started; `was_connected` tells whether the link was up
    Reset { was_connected: bool },
    ProtocolError(String),
    Sent(TransactionId),
    Finished {
        id: TransactionId,
        transaction: Box<dyn Transaction>,
        result: Value,
    },
    /// The transaction failed; a server verdict carries its error code
    Failed {
        id: TransactionId,
        transaction: Box<dyn Transaction>,
        error: Error,
    },
    /// The running transaction was abandoned without a server verdict
    Stopped {
        id: TransactionId,
        transaction: Box<dyn Transaction>,
    },
}

struct Slot {
    id: TransactionId,
    transaction: Box<dyn Transaction>,
}

/// One asynchronous link to the database.
pub struct Connection {
    id: ConnectionId,
    log_info: String,
    driver: Box<dyn ConnectionDriver>,
    status: ConnectionStatus,
    pipeline: PipelineStatus,
    pipeline_wanted: bool,
    current: Option<Slot>,
    planned: Option<Slot>,
    disconnected_since: Instant,
    outbox: Vec<ConnectionEvent>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        log_info: impl Into<String>,
        driver: Box<dyn ConnectionDriver>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            log_info: log_info.into(),
            driver,
            status: ConnectionStatus::Bad,
            pipeline: PipelineStatus::Off,
            pipeline_wanted: false,
            current: None,
            planned: None,
            disconnected_since: now,
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn log_info(&self) -> &str {
        &self.log_info
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn pipeline_status(&self) -> PipelineStatus {
        self.pipeline
    }

    pub fn socket(&self) -> Option<SocketHandle> {
        self.driver.socket()
    }

    /// When the link last went down.
    pub fn disconnected_since(&self) -> Instant {
        self.disconnected_since
    }

    /// Busy while running a transaction or not connected.
    pub fn is_busy(&self) -> bool {
        self.current.is_some() || self.status != ConnectionStatus::Ok
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    pub fn has_planned(&self) -> bool {
        self.planned.is_some()
    }

    pub fn current_id(&self) -> Option<TransactionId> {
        self.current.as_ref().map(|slot| slot.id)
    }

    pub fn current_status(&self) -> Option<TransactionStatus> {
        self.current.as_ref().map(|slot| slot.transaction.status())
    }

    /// Drain events raised since the last call.
    pub fn take_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_events(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Tear the link down and start reconnecting. A running transaction is
    /// stopped and the planned slot is cleared.
    pub fn reset(&mut self, now: Instant) {
        let was_connected = self.status == ConnectionStatus::Ok;
        self.stop_transaction();
        self.planned = None;
        self.status = ConnectionStatus::Bad;
        self.pipeline = PipelineStatus::Off;
        if was_connected {
            self.disconnected_since = now;
        }
        self.outbox.push(ConnectionEvent::Reset { was_connected });
        match self.driver.reset() {
            Ok(events) => self.apply(events, now),
            Err(err) => {
                self.disconnected_since = now;
                self.outbox
                    .push(ConnectionEvent::ConnectionFailed(err.to_string()));
            }
        }
    }

    pub fn close(&mut self, now: Instant) {
        self.stop_transaction();
        self.planned = None;
        self.driver.close();
        if self.status == ConnectionStatus::Ok {
            self.disconnected_since = now;
        }
        self.status = ConnectionStatus::Bad;
        self.pipeline = PipelineStatus::Off;
    }

    /// Readiness from the multiplexer (or a periodic check).
    pub fn on_sock(&mut self, readiness: Readiness, now: Instant) {
        let current = self
            .current
            .as_mut()
            .map(|slot| -> &mut dyn Transaction { slot.transaction.as_mut() });
        let events = self.driver.poll(readiness, current);
        self.apply(events, now);
    }

    /// Start `transaction` now. Hands it back if the connection is busy.
    pub fn run_transaction(
        &mut self,
        id: TransactionId,
        transaction: Box<dyn Transaction>,
        now: Instant,
    ) -> Result<(), Box<dyn Transaction>> {
        if self.is_busy() {
            return Err(transaction);
        }
        self.begin(Slot { id, transaction }, now);
        Ok(())
    }

    /// Queue `transaction` to start once the current one completes. Hands
    /// it back if the planned slot is taken.
    pub fn add_planned_transaction(
        &mut self,
        id: TransactionId,
        transaction: Box<dyn Transaction>,
    ) -> Result<(), Box<dyn Transaction>> {
        if self.planned.is_some() {
            return Err(transaction);
        }
        self.planned = Some(Slot { id, transaction });
        Ok(())
    }

    /// Cooperative cancel: marks the running transaction `Canceling` and
    /// asks the server to stop. The link stays open.
    pub fn cancel_transaction(&mut self) -> bool {
        match self.current.as_mut() {
            Some(slot) => {
                slot.transaction.cancel();
                self.driver.cancel()
            }
            None => false,
        }
    }

    /// Abandon the running transaction without a server verdict.
    pub fn stop_transaction(&mut self) {
        if let Some(slot) = self.current.take() {
            self.outbox.push(ConnectionEvent::Stopped {
                id: slot.id,
                transaction: slot.transaction,
            });
        }
    }

    pub fn start_pipeline(&mut self) {
        self.pipeline_wanted = true;
        if self.status == ConnectionStatus::Ok
            && self.pipeline == PipelineStatus::Off
            && self.driver.start_pipeline()
        {
            self.pipeline = PipelineStatus::On;
        }
    }

    pub fn exit_pipeline(&mut self) {
        self.pipeline_wanted = false;
        if self.pipeline == PipelineStatus::On && self.driver.exit_pipeline() {
            self.pipeline = PipelineStatus::Off;
        }
    }

    pub fn sync_pipeline(&mut self) -> bool {
        self.pipeline == PipelineStatus::On && self.driver.sync_pipeline()
    }

    fn begin(&mut self, mut slot: Slot, now: Instant) {
        slot.transaction.set_status(TransactionStatus::Running);
        match self.driver.send(slot.transaction.as_mut()) {
            Ok(events) => {
                self.current = Some(slot);
                self.apply(events, now);
            }
            Err(err) => {
                slot.transaction.set_status(TransactionStatus::Failed);
                self.outbox.push(ConnectionEvent::Failed {
                    id: slot.id,
                    transaction: slot.transaction,
                    error: err,
                });
            }
        }
    }

    fn start_planned(&mut self, now: Instant) {
        if self.current.is_none() && self.status == ConnectionStatus::Ok {
            if let Some(slot) = self.planned.take() {
                self.begin(slot, now);
            }
        }
    }

    fn apply(&mut self, events: Vec<DriverEvent>, now: Instant) {
        for event in events {
            match event {
                DriverEvent::Socket(interest) => {
                    self.outbox.push(ConnectionEvent::Socket(interest));
                }
                DriverEvent::Connected => {
                    self.status = ConnectionStatus::Ok;
                    if self.pipeline_wanted && self.driver.start_pipeline() {
                        self.pipeline = PipelineStatus::On;
                    }
                    self.outbox.push(ConnectionEvent::Connected);
                }
                DriverEvent::ConnectFailed(message) => {
                    self.status = ConnectionStatus::Bad;
                    self.disconnected_since = now;
                    self.outbox.push(ConnectionEvent::ConnectionFailed(message));
                }
                DriverEvent::Disconnected => {
                    self.status = ConnectionStatus::Bad;
                    self.pipeline = PipelineStatus::Off;
                    self.disconnected_since = now;
                    self.stop_transaction();
                    self.planned = None;
                    self.outbox.push(ConnectionEvent::Disconnected);
                }
                DriverEvent::ProtocolError(message) => {
                    self.outbox.push(ConnectionEvent::ProtocolError(message));
                }
                DriverEvent::Sent => {
                    if let Some(slot) = &self.current {
                        self.outbox.push(ConnectionEvent::Sent(slot.id));
                    }
                }
                DriverEvent::Finished(result) => {
                    if let Some(mut slot) = self.current.take() {
                        slot.transaction.set_status(TransactionStatus::Done);
                        self.outbox.push(ConnectionEvent::Finished {
                            id: slot.id,
                            transaction: slot.transaction,
                            result,
                        });
                    }
                    self.start_planned(now);
                }
                DriverEvent::Failed { message, code } => {
                    if let Some(mut slot) = self.current.take() {
                        slot.transaction.set_status(TransactionStatus::Failed);
                        self.outbox.push(ConnectionEvent::Failed {
                            id: slot.id,
                            transaction: slot.transaction,
                            error: Error::server(message, code),
                        });
                    }
                    self.start_planned(now);
                }
                DriverEvent::PipelineDesync => {
                    self.stop_transaction();
                    self.sync_pipeline();
                    self.start_planned(now);
                }
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("info", &self.log_info)
            .field("status", &self.status)
            .field("pipeline", &self.pipeline)
            .field("current", &self.current_id())
            .field("planned", &self.planned.as_ref().map(|slot| slot.id))
            .finish_non_exhaustive()
    }
}

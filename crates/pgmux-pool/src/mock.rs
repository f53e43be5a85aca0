//! Scriptable in-memory driver.
//!
//! [`MockDriver`] connects instantly (unless told otherwise), accepts
//! transactions on [`send`](ConnectionDriver::send), and settles them on the
//! next poll according to the scripted [`MockReply`] queue. A
//! [`MockHandle`] shares the driver's state so tests can script replies and
//! inspect what was sent while the driver itself is owned by a connection.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use pgmux_core::{Error, Result, Transaction, TransactionStatus};
use serde_json::{Value, json};

use crate::driver::{
    ConnectionDriver, DriverEvent, DriverFactory, Readiness, SocketHandle, SocketInterest,
};

const CANCELED_MESSAGE: &str = "canceling statement due to user request";
const CANCELED_CODE: &str = "57014";

/// How the mock settles the next transaction it is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Complete with this result
    Ok(Value),
    /// Fail at the first statement
    Error {
        message: String,
        code: Option<String>,
    },
    /// Fail while executing statement `index`
    FailAt {
        index: usize,
        message: String,
        code: Option<String>,
    },
    /// Never answer until cancelled, then report the cancellation
    Hang,
    /// Never answer, not even to a cancel
    Wedge,
    /// Lose pipeline synchronization
    Desync,
}

impl MockReply {
    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        MockReply::Error {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }

    pub fn fail_at(index: usize, message: impl Into<String>) -> Self {
        MockReply::FailAt {
            index,
            message: message.into(),
            code: None,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connecting: bool,
    fail_connects: bool,
    defer_connects: bool,
    drop_link: bool,
    defer_sent: bool,
    sent_pending: bool,
    pipeline: bool,
    replies: VecDeque<MockReply>,
    active: Option<MockReply>,
    sent: Vec<Vec<String>>,
    resets: usize,
    cancels: usize,
}

/// Shared view of a [`MockDriver`].
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Script the reply for a future transaction (FIFO).
    pub fn push_reply(&self, reply: MockReply) {
        self.state.lock().replies.push_back(reply);
    }

    /// Make every following reset fail (or succeed again).
    pub fn fail_connects(&self, fail: bool) {
        self.state.lock().fail_connects = fail;
    }

    /// Complete connects on the next poll instead of inside `reset`.
    pub fn defer_connects(&self, defer: bool) {
        self.state.lock().defer_connects = defer;
    }

    /// Report a transaction as sent on the poll after `send` instead of
    /// inside it.
    pub fn defer_sent(&self, defer: bool) {
        self.state.lock().defer_sent = defer;
    }

    /// Drop the link on the next poll.
    pub fn disconnect(&self) {
        self.state.lock().drop_link = true;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn in_pipeline(&self) -> bool {
        self.state.lock().pipeline
    }

    /// Statement texts of every transaction sent, in order.
    pub fn sent(&self) -> Vec<Vec<String>> {
        self.state.lock().sent.clone()
    }

    pub fn resets(&self) -> usize {
        self.state.lock().resets
    }

    pub fn cancels(&self) -> usize {
        self.state.lock().cancels
    }
}

/// In-memory [`ConnectionDriver`].
#[derive(Debug, Default)]
pub struct MockDriver {
    handle: MockHandle,
    socket: SocketHandle,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(handle: MockHandle, socket: SocketHandle) -> Self {
        Self { handle, socket }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl ConnectionDriver for MockDriver {
    fn reset(&mut self) -> Result<Vec<DriverEvent>> {
        let mut state = self.handle.state.lock();
        state.resets += 1;
        state.connected = false;
        state.active = None;
        state.drop_link = false;
        state.sent_pending = false;
        if state.fail_connects {
            state.connecting = false;
            return Err(Error::connect("connection refused"));
        }
        if state.defer_connects {
            state.connecting = true;
            Ok(vec![DriverEvent::Socket(SocketInterest::New)])
        } else {
            state.connected = true;
            Ok(vec![
                DriverEvent::Socket(SocketInterest::New),
                DriverEvent::Connected,
            ])
        }
    }

    fn close(&mut self) {
        let mut state = self.handle.state.lock();
        state.connected = false;
        state.connecting = false;
        state.active = None;
        state.sent_pending = false;
    }

    fn poll(
        &mut self,
        readiness: Readiness,
        current: Option<&mut dyn Transaction>,
    ) -> Vec<DriverEvent> {
        let mut state = self.handle.state.lock();
        if state.connecting {
            state.connecting = false;
            if state.fail_connects {
                return vec![DriverEvent::ConnectFailed("connection refused".into())];
            }
            state.connected = true;
            return vec![DriverEvent::Connected];
        }
        if !state.connected {
            return Vec::new();
        }
        if state.drop_link || readiness == Readiness::Error {
            state.drop_link = false;
            state.connected = false;
            state.active = None;
            return vec![
                DriverEvent::Socket(SocketInterest::Delete),
                DriverEvent::Disconnected,
            ];
        }
        if state.sent_pending {
            state.sent_pending = false;
            return vec![DriverEvent::Sent];
        }
        let Some(tx) = current else {
            return Vec::new();
        };
        let Some(reply) = state.active.take() else {
            return Vec::new();
        };
        match reply {
            MockReply::Ok(value) => {
                while tx.advance() {}
                vec![DriverEvent::Finished(value)]
            }
            MockReply::Error { message, code } => vec![DriverEvent::Failed { message, code }],
            MockReply::FailAt {
                index,
                message,
                code,
            } => {
                for _ in 0..index {
                    tx.advance();
                }
                vec![DriverEvent::Failed { message, code }]
            }
            MockReply::Hang if tx.status() == TransactionStatus::Canceling => {
                vec![DriverEvent::Failed {
                    message: CANCELED_MESSAGE.into(),
                    code: Some(CANCELED_CODE.into()),
                }]
            }
            MockReply::Hang => {
                state.active = Some(MockReply::Hang);
                Vec::new()
            }
            MockReply::Wedge => {
                state.active = Some(MockReply::Wedge);
                Vec::new()
            }
            MockReply::Desync => vec![DriverEvent::PipelineDesync],
        }
    }

    fn send(&mut self, transaction: &mut dyn Transaction) -> Result<Vec<DriverEvent>> {
        let mut state = self.handle.state.lock();
        if !state.connected {
            return Err(Error::connect("not connected"));
        }
        state.sent.push(
            transaction
                .statements()
                .iter()
                .map(|s| s.text().to_string())
                .collect(),
        );
        let reply = state
            .replies
            .pop_front()
            .unwrap_or_else(|| MockReply::Ok(json!([])));
        state.active = Some(reply);
        if state.defer_sent {
            state.sent_pending = true;
            return Ok(vec![DriverEvent::Socket(SocketInterest::ReadWrite)]);
        }
        Ok(vec![
            DriverEvent::Socket(SocketInterest::ReadWrite),
            DriverEvent::Sent,
        ])
    }

    fn cancel(&mut self) -> bool {
        let mut state = self.handle.state.lock();
        state.cancels += 1;
        state.active.is_some()
    }

    fn start_pipeline(&mut self) -> bool {
        self.handle.state.lock().pipeline = true;
        true
    }

    fn exit_pipeline(&mut self) -> bool {
        self.handle.state.lock().pipeline = false;
        true
    }

    fn sync_pipeline(&mut self) -> bool {
        self.handle.state.lock().pipeline
    }

    fn socket(&self) -> Option<SocketHandle> {
        self.handle.is_connected().then_some(self.socket)
    }
}

/// Factory producing [`MockDriver`]s and keeping their handles in creation
/// order.
#[derive(Debug, Default)]
pub struct MockFactory {
    handles: Mutex<Vec<MockHandle>>,
    fail_connects: bool,
    defer_connects: bool,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drivers created by this factory start out refusing connects.
    pub fn failing() -> Self {
        Self {
            fail_connects: true,
            ..Self::default()
        }
    }

    /// Drivers created by this factory connect on their first poll.
    pub fn deferred() -> Self {
        Self {
            defer_connects: true,
            ..Self::default()
        }
    }

    /// Handle of the `index`-th driver created.
    pub fn handle(&self, index: usize) -> Option<MockHandle> {
        self.handles.lock().get(index).cloned()
    }

    pub fn handles(&self) -> Vec<MockHandle> {
        self.handles.lock().clone()
    }
}

impl DriverFactory for MockFactory {
    fn create(&self, _conninfo: &str, _log_info: &str) -> Box<dyn ConnectionDriver> {
        let handle = MockHandle::default();
        handle.fail_connects(self.fail_connects);
        handle.defer_connects(self.defer_connects);
        let mut handles = self.handles.lock();
        let socket = 100 + handles.len() as SocketHandle;
        handles.push(handle.clone());
        Box::new(MockDriver::with_handle(handle, socket))
    }
}

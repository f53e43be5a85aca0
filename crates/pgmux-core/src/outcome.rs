//! Terminal outcomes and the producer notification channel.
//!
//! Every submission that carries a producer address receives exactly one
//! [`Outcome`]. Delivery goes through a [`Mailbox`], which is fire-and-forget:
//! posting never blocks the worker and a vanished producer is not an error.

use std::collections::HashMap;

use crossbeam_channel::{Receiver, Sender, TrySendError, unbounded};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal event for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The transaction completed.
    Result { value: Value, token: String },
    /// The transaction failed, was rejected or was dropped.
    Error { message: String, token: String },
    /// The transaction exceeded its wait timeout.
    Timeout { token: String },
}

impl Outcome {
    /// Correlation token echoed back to the producer.
    pub fn token(&self) -> &str {
        match self {
            Outcome::Result { token, .. }
            | Outcome::Error { token, .. }
            | Outcome::Timeout { token } => token,
        }
    }

    pub fn is_result(&self) -> bool {
        matches!(self, Outcome::Result { .. })
    }
}

/// Cross-context outcome delivery.
///
/// Implementations must be thread-safe and must not apply backpressure.
pub trait Mailbox: Send + Sync {
    /// Deliver `outcome` to `address`. Delivery is at most once.
    fn post(&self, address: &str, outcome: Outcome);
}

/// Address-routed mailbox backed by unbounded channels.
///
/// Producers [`register`](Dispatcher::register) an address and read outcomes
/// from the returned receiver. Posts to unknown or closed addresses are
/// discarded.
#[derive(Debug, Default)]
pub struct Dispatcher {
    routes: RwLock<HashMap<String, Sender<Outcome>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address`, replacing any previous registration.
    pub fn register(&self, address: impl Into<String>) -> Receiver<Outcome> {
        let (tx, rx) = unbounded();
        self.routes.write().insert(address.into(), tx);
        rx
    }

    pub fn unregister(&self, address: &str) -> bool {
        self.routes.write().remove(address).is_some()
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.routes.read().contains_key(address)
    }
}

impl Mailbox for Dispatcher {
    fn post(&self, address: &str, outcome: Outcome) {
        let closed = {
            let routes = self.routes.read();
            match routes.get(address) {
                Some(tx) => matches!(tx.try_send(outcome), Err(TrySendError::Disconnected(_))),
                None => {
                    tracing::debug!(address, "outcome for unknown address discarded");
                    false
                }
            }
        };
        if closed {
            tracing::debug!(address, "producer went away, dropping route");
            self.routes.write().remove(address);
        }
    }
}

/// Mailbox that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMailbox;

impl Mailbox for NullMailbox {
    fn post(&self, _address: &str, _outcome: Outcome) {}
}

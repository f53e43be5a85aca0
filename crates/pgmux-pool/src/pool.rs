//! Fixed-size connection pools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use pgmux_core::{Transaction, TransactionIds};
use serde::Serialize;

use crate::config::{PoolConfig, PoolRole};
use crate::connection::{Connection, ConnectionId, ConnectionStatus, PipelineStatus};
use crate::driver::{DriverFactory, SocketHandle};

/// Per-connection statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub status: ConnectionStatus,
    pub busy: bool,
    pub pipeline: PipelineStatus,
    pub socket: Option<SocketHandle>,
}

/// Pool statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub role: PoolRole,
    /// Members the worker has seen connect and not yet lose
    pub connected_count: usize,
    pub connections: Vec<ConnectionStats>,
}

/// The connections of one role.
pub struct ConnectionPool {
    role: PoolRole,
    config: PoolConfig,
    connections: Vec<Connection>,
    connected: AtomicUsize,
}

impl ConnectionPool {
    /// Create `config.pool_size` connections through `factory` and start
    /// connecting all of them.
    pub fn new(
        role: PoolRole,
        config: PoolConfig,
        factory: &dyn DriverFactory,
        now: Instant,
    ) -> Self {
        let conninfo = config.conninfo();
        let log_info = config.log_info();
        let connections = (0..config.pool_size)
            .map(|index| {
                Connection::new(
                    ConnectionId::new(role, index),
                    log_info.clone(),
                    factory.create(&conninfo, &log_info),
                    now,
                )
            })
            .collect();
        let mut pool = Self {
            role,
            config,
            connections,
            connected: AtomicUsize::new(0),
        };
        pool.reset_connections(now);
        pool
    }

    pub fn role(&self) -> PoolRole {
        self.role
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        id.role == self.role && id.index < self.connections.len()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        if id.role != self.role {
            return None;
        }
        self.connections.get(id.index)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        if id.role != self.role {
            return None;
        }
        self.connections.get_mut(id.index)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn connections_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.iter_mut()
    }

    /// First connected member without a running transaction.
    pub fn get_free_connection(&mut self) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|conn| !conn.is_busy())
    }

    pub fn has_free_connection(&self) -> bool {
        self.connections.iter().any(|conn| !conn.is_busy())
    }

    /// Confirm `id` belongs to this pool and move the connected gauge.
    pub fn check_connection(&self, id: ConnectionId, connecting: bool) -> bool {
        if !self.contains(id) {
            return false;
        }
        if connecting {
            self.connected.fetch_add(1, Ordering::Relaxed);
        } else {
            // Saturate: a reset may be reported for a member that never connected.
            let _ = self
                .connected
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        }
        true
    }

    pub fn connected_count(&self) -> usize {
        self.connected.load(Ordering::Relaxed)
    }

    /// Administrative broadcast: every connected member runs a copy of
    /// `transaction` now if idle, otherwise as its planned follow-up.
    /// Returns how many members accepted a copy.
    pub fn run_transaction_for_pool(
        &mut self,
        transaction: &dyn Transaction,
        ids: &mut TransactionIds,
        now: Instant,
    ) -> usize {
        let mut accepted = 0;
        for conn in &mut self.connections {
            if conn.status() != ConnectionStatus::Ok {
                continue;
            }
            let copy = transaction.clone_box();
            let result = if conn.has_current() {
                conn.add_planned_transaction(ids.next_id(), copy)
            } else {
                conn.run_transaction(ids.next_id(), copy, now)
            };
            match result {
                Ok(()) => accepted += 1,
                Err(rejected) => tracing::error!(
                    conn = %conn.id(),
                    info = conn.log_info(),
                    query = %rejected.describe(),
                    "connection already has a planned transaction"
                ),
            }
        }
        accepted
    }

    /// Force every member to reconnect.
    pub fn reset_connections(&mut self, now: Instant) {
        for conn in &mut self.connections {
            conn.reset(now);
        }
    }

    pub fn use_pipeline(&mut self, enabled: bool) {
        for conn in &mut self.connections {
            if enabled {
                conn.start_pipeline();
            } else {
                conn.exit_pipeline();
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            role: self.role,
            connected_count: self.connected_count(),
            connections: self
                .connections
                .iter()
                .map(|conn| ConnectionStats {
                    status: conn.status(),
                    busy: conn.is_busy(),
                    pipeline: conn.pipeline_status(),
                    socket: conn.socket(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("role", &self.role)
            .field("info", &self.config.log_info())
            .field("size", &self.connections.len())
            .field("connected", &self.connected_count())
            .finish()
    }
}

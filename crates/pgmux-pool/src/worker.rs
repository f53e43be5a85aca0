//! The transaction scheduler.
//!
//! A [`Worker`] owns up to two connection pools and moves transactions
//! through three collections:
//!
//! - the admission queue, filled by [`Worker::submit`] and drained into
//!   batches on every tick,
//! - the active table of transactions running on a connection,
//! - the retry queue of failed transactions waiting for another attempt.
//!
//! The worker is single-threaded and never blocks. Its owner calls
//! [`Worker::on_timer`] whenever [`Worker::next_tick`] is due and
//! [`Worker::on_readiness`] when the multiplexer reports a connection's
//! socket ready; [`WorkerRunner`](crate::WorkerRunner) does both on a
//! dedicated thread.
//!
//! Every submission that carries a producer address receives exactly one
//! [`Outcome`] through the worker's [`Mailbox`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pgmux_core::error::{PoolError, PoolErrorKind, TransactionErrorKind};
use pgmux_core::{
    Clock, Error, Mailbox, Outcome, QueryTransaction, Result, SystemClock, Transaction,
    TransactionId, TransactionIds, TransactionStatus,
};
use serde_json::Value;

use crate::config::{PoolConfig, PoolRole, WorkerConfig};
use crate::connection::{Connection, ConnectionEvent, ConnectionId};
use crate::driver::{DriverFactory, Readiness, SocketInterest};
use crate::pool::ConnectionPool;
use crate::reactor::{NoopReactor, Reactor};
use crate::stats::{WorkerMetrics, WorkerStats};

/// Smallest delay the timer is armed with.
const TIMER_RESOLUTION: Duration = Duration::from_millis(1);

/// A transaction waiting in the admission or retry queue.
#[derive(Debug)]
pub(crate) struct Record {
    pub(crate) transaction: Box<dyn Transaction>,
    /// Pool of the previous attempt, `None` for fresh work
    pub(crate) pool: Option<PoolRole>,
    pub(crate) created_at: Instant,
    pub(crate) producer: String,
    pub(crate) token: String,
    pub(crate) last_error: Option<String>,
}

impl Record {
    fn new(
        transaction: Box<dyn Transaction>,
        created_at: Instant,
        producer: String,
        token: String,
    ) -> Self {
        Self {
            transaction,
            pool: None,
            created_at,
            producer,
            token,
            last_error: None,
        }
    }
}

/// A transaction running on a connection.
#[derive(Debug)]
struct Active {
    id: TransactionId,
    conn: ConnectionId,
    pool: PoolRole,
    size: usize,
    created_at: Instant,
    sent_at: Option<Instant>,
    producer: String,
    token: String,
    /// The wait timeout fired and the transaction was cancelled
    cancelled: bool,
    /// The connection is queued for reset because the cancel never landed
    wedged: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingReset {
    conn: ConnectionId,
    due: Instant,
}

/// Single-threaded scheduler over a primary and an optional secondary pool.
pub struct Worker {
    name: String,
    config: WorkerConfig,
    admin: Option<QueryTransaction>,
    primary: Option<ConnectionPool>,
    secondary: Option<ConnectionPool>,
    mailbox: Arc<dyn Mailbox>,
    clock: Arc<dyn Clock>,
    reactor: Arc<dyn Reactor>,
    ids: TransactionIds,
    queue: VecDeque<Record>,
    active: Vec<Active>,
    pub(crate) retry_queue: VecDeque<Record>,
    pending_resets: VecDeque<PendingReset>,
    next_reset: Option<Instant>,
    pub(crate) next_retry: Option<Instant>,
    next_wait: Option<Instant>,
    next_flush: Option<Instant>,
    pub(crate) immediate: bool,
    pub(crate) metrics: Arc<WorkerMetrics>,
}

impl Worker {
    /// Create a worker with no pools. Fails if `config` does not validate.
    pub fn new(
        name: impl Into<String>,
        config: WorkerConfig,
        mailbox: Arc<dyn Mailbox>,
    ) -> Result<Self> {
        config.validate()?;
        let admin = config.admin_transaction();
        Ok(Self {
            name: name.into(),
            config,
            admin,
            primary: None,
            secondary: None,
            mailbox,
            clock: Arc::new(SystemClock),
            reactor: Arc::new(NoopReactor),
            ids: TransactionIds::new(),
            queue: VecDeque::new(),
            active: Vec::new(),
            retry_queue: VecDeque::new(),
            pending_resets: VecDeque::new(),
            next_reset: None,
            next_retry: None,
            next_wait: None,
            next_flush: None,
            immediate: false,
            metrics: Arc::new(WorkerMetrics::default()),
        })
    }

    /// Use `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Forward socket interest changes to `reactor`.
    pub fn with_reactor(mut self, reactor: Arc<dyn Reactor>) -> Self {
        self.reactor = reactor;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Counters shared with other threads.
    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn pool(&self, role: PoolRole) -> Option<&ConnectionPool> {
        match role {
            PoolRole::Primary => self.primary.as_ref(),
            PoolRole::Secondary => self.secondary.as_ref(),
        }
    }

    fn pool_mut(&mut self, role: PoolRole) -> Option<&mut ConnectionPool> {
        match role {
            PoolRole::Primary => self.primary.as_mut(),
            PoolRole::Secondary => self.secondary.as_mut(),
        }
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.pool(id.role).and_then(|pool| pool.connection(id))
    }

    pub(crate) fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.pool_mut(id.role).and_then(|pool| pool.connection_mut(id))
    }

    /// Every connection of both pools, primary first.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .flat_map(|pool| pool.connections().map(Connection::id))
            .collect()
    }

    /// Statements in the admission queue, counted from the queue itself.
    pub fn queued_statements(&self) -> usize {
        self.queue.iter().map(|r| r.transaction.size()).sum()
    }

    /// Statements in the retry queue, counted from the queue itself.
    pub fn retrying_statements(&self) -> usize {
        self.retry_queue.iter().map(|r| r.transaction.size()).sum()
    }

    /// Statements running, counted from the active table.
    pub fn active_statements(&self) -> usize {
        self.active.iter().map(|a| a.size).sum()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Create the pool for `role` and start connecting its members.
    pub fn create_pool(
        &mut self,
        role: PoolRole,
        config: PoolConfig,
        factory: &dyn DriverFactory,
    ) -> Result<()> {
        if self.pool(role).is_some() {
            tracing::error!(worker = %self.name, %role, "pool already created");
            return Err(Error::Pool(PoolError {
                kind: PoolErrorKind::AlreadyCreated,
                message: format!("{role} pool already created"),
            }));
        }
        let now = self.clock.now();
        tracing::info!(
            worker = %self.name,
            %role,
            info = %config.log_info(),
            size = config.pool_size,
            "creating pool"
        );
        let mut pool = ConnectionPool::new(role, config, factory, now);
        pool.use_pipeline(self.config.pipelining_enabled);
        match role {
            PoolRole::Primary => self.primary = Some(pool),
            PoolRole::Secondary => self.secondary = Some(pool),
        }
        self.process_events();
        Ok(())
    }

    /// Admit `transaction`. `producer` is the address its outcome is posted
    /// to; an empty address means nobody is notified.
    pub fn submit(&mut self, transaction: Box<dyn Transaction>, producer: &str, token: &str) {
        let now = self.clock.now();
        let mut producer = producer.to_string();
        if self.config.batch_size > 1 && !producer.is_empty() {
            tracing::warn!(
                worker = %self.name,
                %producer,
                "batching enabled, outcome will not be reported"
            );
            producer.clear();
        }

        let size = transaction.size();
        let capacity = self.config.queue_capacity;
        if capacity > 0 && self.metrics.queued() + size > capacity {
            tracing::warn!(
                worker = %self.name,
                capacity,
                query = %transaction.describe(),
                "queue is full"
            );
            self.metrics.add_dropped(size);
            self.notify(
                &producer,
                Outcome::Error {
                    message: Error::QueueFull { capacity }.to_string(),
                    token: token.to_string(),
                },
            );
            return;
        }

        tracing::trace!(worker = %self.name, query = %transaction.describe(), "queued");
        self.queue
            .push_back(Record::new(transaction, now, producer, token.to_string()));
        self.metrics.add_queued(size);
        if self.next_flush.is_none() {
            self.next_flush = Some(now + self.config.batch_timeout_duration());
        }
        if self.queue.len() >= self.config.batch_size {
            self.immediate = true;
        }
    }

    /// Readiness reported by the multiplexer for `conn`.
    pub fn on_readiness(&mut self, conn: ConnectionId, readiness: Readiness) {
        let now = self.clock.now();
        match self.connection_mut(conn) {
            Some(connection) => connection.on_sock(readiness, now),
            None => {
                tracing::warn!(worker = %self.name, %conn, "readiness for unknown connection");
                return;
            }
        }
        self.process_events();
    }

    /// Poll every connection once, for drivers without readiness reporting.
    pub fn check_connections(&mut self) {
        for conn in self.connection_ids() {
            self.on_readiness(conn, Readiness::Check);
        }
    }

    /// When [`on_timer`](Self::on_timer) should run next, `None` when the
    /// worker has nothing scheduled.
    pub fn next_tick(&self) -> Option<Instant> {
        let now = self.clock.now();
        if self.immediate {
            return Some(now);
        }
        [
            self.next_reset,
            self.next_retry,
            self.next_wait,
            self.next_flush,
        ]
        .into_iter()
        .flatten()
        .min()
        .map(|at| at.max(now + TIMER_RESOLUTION))
    }

    /// Timer tick: due resets, wait timeouts, then the queues.
    pub fn on_timer(&mut self) {
        let now = self.clock.now();
        self.immediate = false;

        self.run_pending_resets(now);
        self.process_events();

        self.check_timeouts(now);
        self.check_queue(now);
        self.process_events();
    }

    /// Apply a new configuration. Pools keep their connections; the
    /// administrative set is replayed on every connected member.
    pub fn reconfigure(&mut self, config: WorkerConfig) -> Result<()> {
        config.validate()?;
        let now = self.clock.now();
        tracing::info!(worker = %self.name, "reconfiguring");
        self.admin = config.admin_transaction();
        self.config = config;
        if self.config.batch_size > 1 {
            self.discard_queued_producers();
        }

        for pool in [self.primary.as_mut(), self.secondary.as_mut()]
            .into_iter()
            .flatten()
        {
            pool.use_pipeline(self.config.pipelining_enabled);
            if let Some(admin) = &self.admin {
                pool.run_transaction_for_pool(admin, &mut self.ids, now);
            }
        }

        self.next_retry = None;
        self.next_wait = None;
        self.reanchor_resets();
        self.immediate = true;
        self.process_events();
        Ok(())
    }

    /// Queued work may now be merged into batches, which cannot report to
    /// individual producers.
    fn discard_queued_producers(&mut self) {
        for record in &mut self.queue {
            if record.producer.is_empty() {
                continue;
            }
            tracing::warn!(
                worker = %self.name,
                producer = %record.producer,
                "batching enabled, outcome will not be reported"
            );
            record.producer.clear();
        }
    }

    /// Force every connection of both pools to reconnect.
    pub fn reset_pools(&mut self) {
        self.reset_pool(PoolRole::Primary);
        self.reset_pool(PoolRole::Secondary);
    }

    pub fn reset_pool(&mut self, role: PoolRole) {
        let now = self.clock.now();
        if self.pool(role).is_none() {
            return;
        }
        tracing::info!(worker = %self.name, %role, "resetting pool");
        if let Some(pool) = self.pool_mut(role) {
            pool.reset_connections(now);
        }
        self.process_events();
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = WorkerStats::from_metrics(&self.name, &self.metrics);
        stats.primary = self.primary.as_ref().map(ConnectionPool::stats);
        stats.secondary = self.secondary.as_ref().map(ConnectionPool::stats);
        stats
    }

    pub(crate) fn notify(&self, producer: &str, outcome: Outcome) {
        if !producer.is_empty() {
            self.mailbox.post(producer, outcome);
        }
    }

    /// First free connection, primary pool first.
    pub(crate) fn free_connection(&mut self) -> Option<ConnectionId> {
        self.free_connection_in(PoolRole::Primary)
            .or_else(|| self.free_connection_in(PoolRole::Secondary))
    }

    pub(crate) fn free_connection_in(&mut self, role: PoolRole) -> Option<ConnectionId> {
        self.pool_mut(role)?.get_free_connection().map(|c| c.id())
    }

    fn has_free_connection(&self) -> bool {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .any(ConnectionPool::has_free_connection)
    }

    /// Run `record` on `conn` and enter it into the active table. Hands the
    /// record back if the connection refused it.
    pub(crate) fn start(
        &mut self,
        mut record: Record,
        conn: ConnectionId,
        now: Instant,
    ) -> std::result::Result<(), Record> {
        let id = self.ids.next_id();
        let size = record.transaction.size();
        tracing::debug!(
            worker = %self.name,
            %conn,
            %id,
            query = %record.transaction.describe(),
            "dispatching"
        );
        let Some(connection) = self.connection_mut(conn) else {
            return Err(record);
        };
        if let Err(transaction) = connection.run_transaction(id, record.transaction, now) {
            record.transaction = transaction;
            return Err(record);
        }
        self.active.push(Active {
            id,
            conn,
            pool: conn.role,
            size,
            created_at: now,
            sent_at: None,
            producer: record.producer,
            token: record.token,
            cancelled: false,
            wedged: false,
        });
        self.metrics.add_active(size);
        let deadline = now + self.config.wait_timeout();
        self.next_wait = Some(self.next_wait.map_or(deadline, |t| t.min(deadline)));
        Ok(())
    }

    /// Queue `conn` for reset at `due`. A connection is queued at most once.
    fn schedule_reset(&mut self, conn: ConnectionId, due: Instant) {
        if self.pending_resets.iter().any(|r| r.conn == conn) {
            return;
        }
        let pos = self.pending_resets.partition_point(|r| r.due <= due);
        self.pending_resets.insert(pos, PendingReset { conn, due });
        self.next_reset = Some(self.next_reset.map_or(due, |t| t.min(due)));
    }

    fn run_pending_resets(&mut self, now: Instant) {
        self.next_reset = None;
        while let Some(entry) = self.pending_resets.front().copied() {
            if entry.due > now {
                self.next_reset = Some(entry.due);
                break;
            }
            self.pending_resets.pop_front();
            tracing::info!(worker = %self.name, conn = %entry.conn, "reconnecting");
            if let Some(conn) = self.connection_mut(entry.conn) {
                conn.reset(now);
            }
        }
    }

    /// Re-anchor queued resets on the current reconnect interval.
    fn reanchor_resets(&mut self) {
        let interval = self.config.reconnect_interval_duration();
        let mut entries: Vec<PendingReset> = self.pending_resets.drain(..).collect();
        for entry in &mut entries {
            if let Some(conn) = self.connection(entry.conn) {
                entry.due = conn.disconnected_since() + interval;
            }
        }
        entries.sort_by_key(|r| r.due);
        self.next_reset = entries.first().map(|r| r.due);
        self.pending_resets = entries.into();
    }

    /// Fire wait timeouts and spot connections that ignore cancels.
    fn check_timeouts(&mut self, now: Instant) {
        let wait = self.config.wait_timeout();
        let recovers = self.config.recovers_errors();
        self.next_wait = None;
        let mut cancel = Vec::new();
        let mut wedged = Vec::new();

        for entry in &mut self.active {
            let age = now.saturating_duration_since(entry.created_at);
            if !entry.cancelled {
                if age > wait {
                    entry.cancelled = true;
                    tracing::warn!(
                        worker = %self.name,
                        conn = %entry.conn,
                        id = %entry.id,
                        elapsed_ms = age.as_millis() as u64,
                        "transaction timed out, cancelling"
                    );
                    if !recovers && !entry.producer.is_empty() {
                        self.mailbox.post(
                            &entry.producer,
                            Outcome::Timeout {
                                token: entry.token.clone(),
                            },
                        );
                        entry.producer.clear();
                    }
                    cancel.push(entry.conn);
                } else {
                    let deadline = entry.created_at + wait;
                    self.next_wait = Some(self.next_wait.map_or(deadline, |t| t.min(deadline)));
                    continue;
                }
            }
            if entry.wedged {
                continue;
            }
            if age > wait * 2 {
                entry.wedged = true;
                tracing::warn!(
                    worker = %self.name,
                    conn = %entry.conn,
                    id = %entry.id,
                    "cancel did not complete, resetting connection"
                );
                wedged.push(entry.conn);
            } else {
                let deadline = entry.created_at + wait * 2;
                self.next_wait = Some(self.next_wait.map_or(deadline, |t| t.min(deadline)));
            }
        }

        for conn in cancel {
            if let Some(connection) = self.connection_mut(conn) {
                if connection.current_status() == Some(TransactionStatus::Running) {
                    connection.cancel_transaction();
                }
            }
        }
        for conn in wedged {
            self.schedule_reset(conn, now);
        }
    }

    /// Drain the retry queue, then batch the admission queue onto free
    /// connections.
    fn check_queue(&mut self, now: Instant) {
        self.drain_retries(now);

        if self.queue.is_empty() {
            self.next_flush = None;
            return;
        }
        let batch_size = self.config.batch_size;
        if self
            .next_flush
            .is_some_and(|flush| now < flush && self.queue.len() < batch_size)
        {
            return;
        }

        while !self.queue.is_empty() && self.has_free_connection() {
            let mut batch = self.queue[0].transaction.clone_box();
            let mut count = batch.size();
            let mut taken = 1;
            while count < batch_size && taken < self.queue.len() {
                let next = self.queue[taken].transaction.as_ref();
                if !batch.merge(next) {
                    break;
                }
                count += next.size();
                taken += 1;
            }
            let last = &self.queue[taken - 1];
            let record = Record::new(batch, now, last.producer.clone(), last.token.clone());
            tracing::trace!(
                worker = %self.name,
                statements = count,
                transactions = taken,
                "batch formed"
            );
            match self.dispatch(record, now) {
                crate::retry::Dispatch::NoConnection(_) => break,
                crate::retry::Dispatch::Consumed => {}
                crate::retry::Dispatch::NotYet(record) => self.push_retry(record),
            }
            self.queue.drain(..taken);
            self.metrics.sub_queued(count);
        }

        self.next_flush = if self.queue.is_empty() {
            None
        } else {
            Some(now + self.config.batch_timeout_duration())
        };
    }

    /// Drain connection outboxes until no connection has events left.
    pub(crate) fn process_events(&mut self) {
        loop {
            let mut events = Vec::new();
            for pool in [self.primary.as_mut(), self.secondary.as_mut()]
                .into_iter()
                .flatten()
            {
                for conn in pool.connections_mut() {
                    if conn.has_events() {
                        let id = conn.id();
                        events.extend(conn.take_events().into_iter().map(|e| (id, e)));
                    }
                }
            }
            if events.is_empty() {
                break;
            }
            for (conn, event) in events {
                self.handle_event(conn, event);
            }
        }
    }

    fn handle_event(&mut self, conn: ConnectionId, event: ConnectionEvent) {
        let now = self.clock.now();
        match event {
            ConnectionEvent::Socket(interest) => self.on_socket(conn, interest, now),
            ConnectionEvent::Connected => self.on_connect(conn, now),
            ConnectionEvent::ConnectionFailed(message) => {
                tracing::error!(worker = %self.name, %conn, %message, "connection failed");
                self.schedule_reconnect(conn);
            }
            ConnectionEvent::Disconnected => {
                tracing::warn!(worker = %self.name, %conn, "connection lost");
                if let Some(pool) = self.pool(conn.role) {
                    pool.check_connection(conn, false);
                }
                self.schedule_reconnect(conn);
            }
            ConnectionEvent::Reset { was_connected } => {
                tracing::info!(worker = %self.name, %conn, was_connected, "connection reset");
                if was_connected {
                    if let Some(pool) = self.pool(conn.role) {
                        pool.check_connection(conn, false);
                    }
                }
            }
            ConnectionEvent::ProtocolError(message) => {
                tracing::error!(worker = %self.name, %conn, %message, "protocol error");
            }
            ConnectionEvent::Sent(id) => {
                if let Some(entry) = self.active.iter_mut().find(|a| a.id == id) {
                    entry.sent_at.get_or_insert(now);
                }
            }
            ConnectionEvent::Finished {
                id,
                transaction,
                result,
            } => self.on_finish(conn, id, transaction.as_ref(), result, now),
            ConnectionEvent::Failed {
                id,
                transaction,
                error,
            } => {
                self.on_error(conn, id, transaction.as_ref(), &error, now);
                if let Some(code) = error.code() {
                    if self.config.triggers_reconnect(code) {
                        tracing::warn!(
                            worker = %self.name,
                            %conn,
                            %code,
                            "error code triggers reconnect"
                        );
                        self.schedule_reset(conn, now);
                    }
                }
            }
            ConnectionEvent::Stopped { id, transaction } => {
                self.on_stop(conn, id, transaction.as_ref(), now);
            }
        }
    }

    fn schedule_reconnect(&mut self, conn: ConnectionId) {
        let Some(since) = self.connection(conn).map(Connection::disconnected_since) else {
            return;
        };
        let due = since + self.config.reconnect_interval_duration();
        self.schedule_reset(conn, due);
    }

    fn on_socket(&mut self, conn: ConnectionId, interest: SocketInterest, now: Instant) {
        let socket = self.connection(conn).and_then(Connection::socket);
        if let Err(err) = self.reactor.update(conn, socket, interest) {
            tracing::error!(
                worker = %self.name,
                %conn,
                ?interest,
                error = %err,
                "socket registration failed"
            );
            let due = self
                .connection(conn)
                .map_or(now, Connection::disconnected_since)
                + self.config.reconnect_interval_duration();
            self.schedule_reset(conn, due);
        }
    }

    fn on_connect(&mut self, conn: ConnectionId, now: Instant) {
        tracing::info!(worker = %self.name, %conn, "connected");
        if let Some(pool) = self.pool(conn.role) {
            pool.check_connection(conn, true);
        }
        let Some(admin) = self.admin.as_ref().map(Transaction::clone_box) else {
            self.immediate = true;
            return;
        };
        let id = self.ids.next_id();
        let rejected = self
            .connection_mut(conn)
            .is_some_and(|connection| connection.run_transaction(id, admin, now).is_err());
        if rejected {
            tracing::error!(worker = %self.name, %conn, "transaction already exists");
        }
    }

    fn on_finish(
        &mut self,
        conn: ConnectionId,
        id: TransactionId,
        transaction: &dyn Transaction,
        result: Value,
        now: Instant,
    ) {
        self.immediate = true;
        let Some(pos) = self.active.iter().position(|a| a.id == id) else {
            tracing::debug!(worker = %self.name, %conn, %id, "administrative transaction finished");
            return;
        };
        let entry = self.active.remove(pos);
        let elapsed = now.saturating_duration_since(entry.sent_at.unwrap_or(entry.created_at));
        tracing::debug!(
            worker = %self.name,
            %conn,
            %id,
            query = %transaction.describe(),
            elapsed_ms = elapsed.as_millis() as u64,
            "transaction finished"
        );
        self.metrics.sub_active(entry.size);
        self.metrics
            .add_finished(entry.size, elapsed.as_millis() as u64);
        self.notify(
            &entry.producer,
            Outcome::Result {
                value: result,
                token: entry.token,
            },
        );
    }

    fn on_error(
        &mut self,
        conn: ConnectionId,
        id: TransactionId,
        transaction: &dyn Transaction,
        error: &Error,
        now: Instant,
    ) {
        tracing::error!(
            worker = %self.name,
            %conn,
            %id,
            query = %transaction.describe(),
            %error,
            "transaction failed"
        );
        let Some(pos) = self.active.iter().position(|a| a.id == id) else {
            tracing::error!(worker = %self.name, %conn, %id, "administrative transaction failed");
            // The connection is free again.
            self.immediate = true;
            return;
        };
        let entry = self.active.remove(pos);
        self.metrics.sub_active(entry.size);
        if !self.config.recovers_errors() || !error.is_retryable() {
            self.notify(
                &entry.producer,
                Outcome::Error {
                    message: error.to_string(),
                    token: entry.token,
                },
            );
            return;
        }
        self.requeue_failed(
            transaction,
            entry.pool,
            entry.producer,
            entry.token,
            error.to_string(),
            now,
        );
    }

    fn on_stop(
        &mut self,
        conn: ConnectionId,
        id: TransactionId,
        transaction: &dyn Transaction,
        now: Instant,
    ) {
        let Some(pos) = self.active.iter().position(|a| a.id == id) else {
            tracing::debug!(worker = %self.name, %conn, %id, "administrative transaction stopped");
            return;
        };
        let entry = self.active.remove(pos);
        tracing::error!(
            worker = %self.name,
            %conn,
            %id,
            query = %transaction.describe(),
            "transaction stopped, requeueing"
        );
        self.metrics.sub_active(entry.size);
        let error = Error::transaction(TransactionErrorKind::Stopped, "transaction stopped");
        let mut record = Record::new(transaction.clone_box(), now, entry.producer, entry.token);
        record.last_error = Some(error.to_string());
        self.push_retry(record);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let now = self.clock.now();
        for pool in [self.primary.as_mut(), self.secondary.as_mut()]
            .into_iter()
            .flatten()
        {
            for conn in pool.connections_mut() {
                conn.close(now);
            }
        }
        tracing::debug!(
            worker = %self.name,
            queued = self.queue.len(),
            retrying = self.retry_queue.len(),
            active = self.active.len(),
            "worker dropped"
        );
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .field("queued", &self.queue.len())
            .field("active", &self.active.len())
            .field("retrying", &self.retry_queue.len())
            .finish_non_exhaustive()
    }
}

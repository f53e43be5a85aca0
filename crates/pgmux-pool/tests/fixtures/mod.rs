//! Shared harness for pgmux-pool integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};

use parking_lot::Mutex;
use pgmux_core::{
    ManualClock, Mailbox, Outcome, QueryTransaction, Statement, Transaction, TransactionKind,
    TransactionStatus,
};
use pgmux_pool::mock::{MockFactory, MockHandle};
use pgmux_pool::{ConnectionId, PoolConfig, PoolRole, Readiness, Worker, WorkerConfig};

/// Mailbox that keeps every posted outcome.
#[derive(Debug, Default)]
pub struct Collector {
    posted: Mutex<Vec<(String, Outcome)>>,
}

impl Collector {
    pub fn all(&self) -> Vec<(String, Outcome)> {
        self.posted.lock().clone()
    }

    pub fn for_token(&self, token: &str) -> Vec<Outcome> {
        self.posted
            .lock()
            .iter()
            .filter(|(_, o)| o.token() == token)
            .map(|(_, o)| o.clone())
            .collect()
    }
}

impl Mailbox for Collector {
    fn post(&self, address: &str, outcome: Outcome) {
        self.posted.lock().push((address.to_string(), outcome));
    }
}

pub struct Harness {
    pub worker: Worker,
    pub clock: ManualClock,
    pub mailbox: Arc<Collector>,
    pub primary: MockFactory,
    pub secondary: MockFactory,
}

impl Harness {
    pub fn new(config: WorkerConfig) -> Self {
        let clock = ManualClock::new();
        let mailbox = Arc::new(Collector::default());
        let worker = Worker::new("harness", config, mailbox.clone())
            .expect("valid config")
            .with_clock(Arc::new(clock.clone()));
        Self {
            worker,
            clock,
            mailbox,
            primary: MockFactory::new(),
            secondary: MockFactory::new(),
        }
    }

    /// Worker with a connected primary pool of `size` members.
    pub fn with_primary(config: WorkerConfig, size: usize) -> Self {
        let mut harness = Self::new(config);
        harness.add_pool(PoolRole::Primary, size);
        harness
    }

    pub fn add_pool(&mut self, role: PoolRole, size: usize) {
        let factory = match role {
            PoolRole::Primary => &self.primary,
            PoolRole::Secondary => &self.secondary,
        };
        self.worker
            .create_pool(role, PoolConfig::new(role.as_str(), "app", size), factory)
            .expect("pool created");
    }

    pub fn handle(&self, role: PoolRole, index: usize) -> MockHandle {
        let factory = match role {
            PoolRole::Primary => &self.primary,
            PoolRole::Secondary => &self.secondary,
        };
        factory.handle(index).expect("driver created")
    }

    pub fn poll(&mut self, role: PoolRole, index: usize) {
        self.worker
            .on_readiness(ConnectionId::new(role, index), Readiness::Read);
    }

    pub fn tick(&mut self) {
        self.worker.on_timer();
    }

    /// Advance the clock and tick.
    pub fn tick_after(&mut self, ms: u64) {
        self.clock.advance_ms(ms);
        self.worker.on_timer();
    }

    /// Gauges agree with the collections they count.
    pub fn assert_gauges(&self) {
        let metrics = self.worker.metrics();
        assert_eq!(metrics.queued(), self.worker.queued_statements());
        assert_eq!(metrics.retrying(), self.worker.retrying_statements());
        assert_eq!(metrics.active(), self.worker.active_statements());
    }
}

pub fn sql(text: &str) -> Box<dyn Transaction> {
    Box::new(QueryTransaction::plain().exec(Statement::sql(text)))
}

pub fn chained(texts: &[&str]) -> Box<dyn Transaction> {
    Box::new(
        texts
            .iter()
            .fold(QueryTransaction::chained(), |tx, t| tx.exec(Statement::sql(*t))),
    )
}

pub fn plain(texts: &[&str]) -> Box<dyn Transaction> {
    Box::new(
        texts
            .iter()
            .fold(QueryTransaction::plain(), |tx, t| tx.exec(Statement::sql(*t))),
    )
}

/// Transaction that tracks how many copies of itself are alive.
#[derive(Debug)]
pub struct Counted {
    inner: Box<dyn Transaction>,
    live: Arc<AtomicIsize>,
}

impl Counted {
    pub fn wrap(inner: Box<dyn Transaction>, live: &Arc<AtomicIsize>) -> Box<dyn Transaction> {
        live.fetch_add(1, Ordering::SeqCst);
        Box::new(Self {
            inner,
            live: Arc::clone(live),
        })
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transaction for Counted {
    fn kind(&self) -> TransactionKind {
        self.inner.kind()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn status(&self) -> TransactionStatus {
        self.inner.status()
    }

    fn set_status(&mut self, status: TransactionStatus) {
        self.inner.set_status(status);
    }

    fn statements(&self) -> &[Statement] {
        self.inner.statements()
    }

    fn cursor(&self) -> usize {
        self.inner.cursor()
    }

    fn advance(&mut self) -> bool {
        self.inner.advance()
    }

    fn clone_box(&self) -> Box<dyn Transaction> {
        Counted::wrap(self.inner.clone_box(), &self.live)
    }

    fn merge(&mut self, other: &dyn Transaction) -> bool {
        self.inner.merge(other)
    }

    fn split_at_current(&self) -> (Box<dyn Transaction>, Option<Box<dyn Transaction>>) {
        let (attempted, rest) = self.inner.split_at_current();
        (
            Counted::wrap(attempted, &self.live),
            rest.map(|r| Counted::wrap(r, &self.live)),
        )
    }
}

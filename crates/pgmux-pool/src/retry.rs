//! Dispatch policy and failure recovery.
//!
//! Fresh work goes to the first free connection, primary pool first. A
//! failed transaction remembers the pool it failed on and is retried no
//! sooner than `retry_interval` after the failure; with failover enabled a
//! primary failure moves to the secondary pool once the interval passed.

use std::time::Instant;

use pgmux_core::error::TransactionErrorKind;
use pgmux_core::{Error, Outcome, Transaction, TransactionKind};

use crate::config::PoolRole;
use crate::worker::{Record, Worker};

/// Result of one dispatch attempt.
#[derive(Debug)]
pub(crate) enum Dispatch {
    /// Started on a connection, or discarded by policy
    Consumed,
    /// Retry interval not elapsed or failover target busy
    NotYet(Record),
    /// No free connection in any pool
    NoConnection(Record),
}

impl Worker {
    pub(crate) fn dispatch(&mut self, mut record: Record, now: Instant) -> Dispatch {
        match record.pool {
            None => match self.free_connection() {
                Some(conn) => match self.start(record, conn, now) {
                    Ok(()) => Dispatch::Consumed,
                    Err(record) => Dispatch::NoConnection(record),
                },
                None => Dispatch::NoConnection(record),
            },
            Some(PoolRole::Primary) => {
                if !self.config().recovers_errors() {
                    self.discard(record);
                    return Dispatch::Consumed;
                }
                if self.retry_pending(&record, now) {
                    return Dispatch::NotYet(record);
                }
                if self.config().failover_to_secondary && self.pool(PoolRole::Secondary).is_some()
                {
                    return match self.free_connection_in(PoolRole::Secondary) {
                        Some(conn) => match self.start(record, conn, now) {
                            Ok(()) => Dispatch::Consumed,
                            Err(record) => Dispatch::NotYet(record),
                        },
                        None => Dispatch::NotYet(record),
                    };
                }
                record.pool = None;
                self.dispatch_retry(record, now)
            }
            Some(PoolRole::Secondary) => self.dispatch_retry(record, now),
        }
    }

    /// Plain retry: wait out the interval, then compete as fresh work.
    fn dispatch_retry(&mut self, mut record: Record, now: Instant) -> Dispatch {
        if !self.config().retry_enabled {
            self.discard(record);
            return Dispatch::Consumed;
        }
        if self.retry_pending(&record, now) {
            return Dispatch::NotYet(record);
        }
        record.pool = None;
        self.dispatch(record, now)
    }

    /// Is `record` still inside its retry interval? Arms the retry wake-up
    /// if so.
    fn retry_pending(&mut self, record: &Record, now: Instant) -> bool {
        let due = record.created_at + self.config().retry_interval_duration();
        if now < due {
            self.next_retry = Some(self.next_retry.map_or(due, |t| t.min(due)));
            return true;
        }
        false
    }

    fn discard(&mut self, record: Record) {
        let message = record.last_error.unwrap_or_else(|| {
            Error::transaction(TransactionErrorKind::Dropped, "transaction dropped").to_string()
        });
        tracing::warn!(
            worker = %self.name(),
            query = %record.transaction.describe(),
            %message,
            "retry policy disabled, dropping transaction"
        );
        self.notify(
            &record.producer,
            Outcome::Error {
                message,
                token: record.token,
            },
        );
    }

    pub(crate) fn push_retry(&mut self, record: Record) {
        let size = record.transaction.size();
        if record.pool.is_none() {
            self.immediate = true;
        } else {
            let due = record.created_at + self.config().retry_interval_duration();
            self.next_retry = Some(self.next_retry.map_or(due, |t| t.min(due)));
        }
        self.retry_queue.push_back(record);
        self.metrics.add_retrying(size);
    }

    /// Try every retry entry in order. Stops at the first entry that finds
    /// no free connection; the rest keep their place.
    pub(crate) fn drain_retries(&mut self, now: Instant) {
        self.next_retry = None;
        let mut pending = std::mem::take(&mut self.retry_queue);
        while let Some(record) = pending.pop_front() {
            let size = record.transaction.size();
            match self.dispatch(record, now) {
                Dispatch::Consumed => self.metrics.sub_retrying(size),
                Dispatch::NotYet(record) => self.retry_queue.push_back(record),
                Dispatch::NoConnection(record) => {
                    self.retry_queue.push_back(record);
                    self.retry_queue.extend(pending.drain(..));
                    break;
                }
            }
        }
    }

    /// Queue the retryable part of a failed transaction.
    ///
    /// A non-chained transaction outside pipeline mode is retried whole.
    /// Chained and pipelined transactions are split at the failing
    /// statement: the attempted piece keeps the producer and the pool
    /// affinity, the untouched remainder runs as fresh unreported work.
    pub(crate) fn requeue_failed(
        &mut self,
        transaction: &dyn Transaction,
        pool: PoolRole,
        producer: String,
        token: String,
        message: String,
        now: Instant,
    ) {
        let whole = match transaction.kind() {
            TransactionKind::Plain => !self.config().pipelining_enabled,
            TransactionKind::Prepared => true,
            TransactionKind::Chained => false,
        };
        let (attempted, rest) = if whole {
            (transaction.clone_box(), None)
        } else {
            transaction.split_at_current()
        };
        tracing::info!(
            worker = %self.name(),
            %pool,
            query = %attempted.describe(),
            split = rest.is_some(),
            "scheduling retry"
        );
        self.push_retry(Record {
            transaction: attempted,
            pool: Some(pool),
            created_at: now,
            producer,
            token,
            last_error: Some(message.clone()),
        });
        if let Some(rest) = rest {
            self.push_retry(Record {
                transaction: rest,
                pool: None,
                created_at: now,
                producer: String::new(),
                token: String::new(),
                last_error: Some(message),
            });
        }
    }
}

//! Dedicated-thread execution of a [`Worker`].
//!
//! The worker itself is single-threaded. [`WorkerRunner::spawn`] moves it
//! onto its own thread, which sleeps on a command channel until either a
//! command arrives or the worker's next tick is due. Other threads talk to
//! it through cloneable [`WorkerHandle`]s.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use pgmux_core::{Error, Result, Transaction};

use crate::config::{PoolRole, WorkerConfig};
use crate::connection::ConnectionId;
use crate::driver::Readiness;
use crate::stats::{WorkerMetrics, WorkerStats};
use crate::worker::Worker;

enum Command {
    Submit {
        transaction: Box<dyn Transaction>,
        producer: String,
        token: String,
    },
    Readiness(ConnectionId, Readiness),
    Reconfigure(WorkerConfig, Sender<Result<()>>),
    ResetPools,
    ResetPool(PoolRole),
    Stats(Sender<WorkerStats>),
    Shutdown,
}

/// Cloneable sender side of a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    name: String,
    commands: Sender<Command>,
    metrics: Arc<WorkerMetrics>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counters of the worker, readable without a round-trip.
    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    pub fn submit(
        &self,
        transaction: Box<dyn Transaction>,
        producer: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<()> {
        self.send(Command::Submit {
            transaction,
            producer: producer.into(),
            token: token.into(),
        })
    }

    /// Forward readiness from an external multiplexer.
    pub fn readiness(&self, conn: ConnectionId, readiness: Readiness) -> Result<()> {
        self.send(Command::Readiness(conn, readiness))
    }

    /// Apply `config` and wait for the worker to accept or reject it.
    pub fn reconfigure(&self, config: WorkerConfig) -> Result<()> {
        let (reply, answer) = bounded(1);
        self.send(Command::Reconfigure(config, reply))?;
        answer.recv().map_err(|_| Error::Shutdown)?
    }

    pub fn reset_pools(&self) -> Result<()> {
        self.send(Command::ResetPools)
    }

    pub fn reset_pool(&self, role: PoolRole) -> Result<()> {
        self.send(Command::ResetPool(role))
    }

    pub fn stats(&self) -> Result<WorkerStats> {
        let (reply, answer) = bounded(1);
        self.send(Command::Stats(reply))?;
        answer.recv().map_err(|_| Error::Shutdown)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Shutdown)
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Owner of the worker thread. Dropping it shuts the worker down.
#[derive(Debug)]
pub struct WorkerRunner {
    handle: WorkerHandle,
    thread: Option<JoinHandle<()>>,
}

impl WorkerRunner {
    /// Move `worker` onto a new thread. Pools must already be created.
    pub fn spawn(worker: Worker) -> Result<Self> {
        let (commands, inbox) = unbounded();
        let handle = WorkerHandle {
            name: worker.name().to_string(),
            commands,
            metrics: worker.metrics(),
        };
        let thread = thread::Builder::new()
            .name(format!("pgmux-{}", worker.name()))
            .spawn(move || run(worker, &inbox))?;
        tracing::info!(worker = %handle.name, "worker started");
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Stop the worker and wait for its thread. Queued work is dropped.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.handle.commands.send(Command::Shutdown);
        if thread.join().is_err() {
            tracing::error!(worker = %self.handle.name, "worker thread panicked");
        }
        tracing::info!(worker = %self.handle.name, "worker stopped");
    }
}

impl Drop for WorkerRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut worker: Worker, inbox: &Receiver<Command>) {
    loop {
        let received = match worker.next_tick() {
            Some(at) => inbox.recv_deadline(at),
            None => inbox.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => apply(&mut worker, command),
            Err(RecvTimeoutError::Timeout) => worker.on_timer(),
        }
        if worker.next_tick().is_some_and(|at| at <= Instant::now()) {
            worker.on_timer();
        }
    }
}

fn apply(worker: &mut Worker, command: Command) {
    match command {
        Command::Submit {
            transaction,
            producer,
            token,
        } => worker.submit(transaction, &producer, &token),
        Command::Readiness(conn, readiness) => worker.on_readiness(conn, readiness),
        Command::Reconfigure(config, reply) => {
            let _ = reply.send(worker.reconfigure(config));
        }
        Command::ResetPools => worker.reset_pools(),
        Command::ResetPool(role) => worker.reset_pool(role),
        Command::Stats(reply) => {
            let _ = reply.send(worker.stats());
        }
        Command::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::mock::MockFactory;
    use pgmux_core::{Dispatcher, Outcome, QueryTransaction, Statement};
    use std::time::Duration;

    #[test]
    fn test_runner_delivers_outcome() {
        let dispatcher = Arc::new(Dispatcher::new());
        let outcomes = dispatcher.register("client");
        let mut worker = Worker::new("bg", WorkerConfig::new(), dispatcher.clone()).unwrap();
        let factory = MockFactory::new();
        worker
            .create_pool(PoolRole::Primary, PoolConfig::new("db", "app", 1), &factory)
            .unwrap();
        let runner = WorkerRunner::spawn(worker).unwrap();
        let handle = runner.handle();

        let tx = QueryTransaction::plain().exec(Statement::sql("SELECT 1"));
        handle.submit(Box::new(tx), "client", "t1").unwrap();
        // The mock settles on the next poll.
        let conn = ConnectionId::new(PoolRole::Primary, 0);
        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = loop {
            handle.readiness(conn, Readiness::Read).unwrap();
            if let Ok(outcome) = outcomes.recv_timeout(Duration::from_millis(20)) {
                break outcome;
            }
            assert!(Instant::now() < deadline, "no outcome delivered");
        };
        assert!(matches!(outcome, Outcome::Result { ref token, .. } if token == "t1"));
        assert_eq!(handle.stats().unwrap().finished, 1);
        runner.shutdown();
        assert!(matches!(handle.reset_pools(), Err(Error::Shutdown)));
    }

    #[test]
    fn test_reconfigure_round_trip() {
        let worker = Worker::new("cfg", WorkerConfig::new(), Arc::new(pgmux_core::NullMailbox))
            .unwrap();
        let runner = WorkerRunner::spawn(worker).unwrap();
        let handle = runner.handle();
        assert!(handle.reconfigure(WorkerConfig::new().batch_size(4)).is_ok());
        assert!(handle.reconfigure(WorkerConfig::new().batch_size(0)).is_err());
        drop(runner);
        assert!(handle.stats().is_err());
    }
}

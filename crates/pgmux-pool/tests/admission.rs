//! Admission queue: capacity, producer handling and batching.

mod fixtures;

use fixtures::*;
use pgmux_core::Outcome;
use pgmux_pool::{PoolRole, WorkerConfig};

#[test]
fn test_queue_full_rejects_only_the_excess() {
    let mut h = Harness::new(WorkerConfig::new().queue_capacity(3));
    for i in 1..=5 {
        h.worker.submit(sql("SELECT 1"), "client", &format!("t{i}"));
    }

    let metrics = h.worker.metrics();
    assert_eq!(metrics.queued(), 3);
    assert_eq!(metrics.dropped(), 2);
    let posted = h.mailbox.all();
    assert_eq!(posted.len(), 2);
    for (address, outcome) in &posted {
        assert_eq!(address, "client");
        assert!(matches!(outcome, Outcome::Error { message, .. } if message == "queue is full"));
    }
    assert!(h.mailbox.for_token("t3").is_empty());
    assert_eq!(h.mailbox.for_token("t4").len(), 1);
    assert_eq!(h.mailbox.for_token("t5").len(), 1);
    h.assert_gauges();
}

#[test]
fn test_capacity_counts_statements() {
    let mut h = Harness::new(WorkerConfig::new().queue_capacity(3));
    h.worker.submit(plain(&["a", "b"]), "client", "t1");
    h.worker.submit(plain(&["c", "d"]), "client", "t2");
    h.worker.submit(sql("e"), "client", "t3");

    let metrics = h.worker.metrics();
    assert_eq!(metrics.queued(), 3);
    assert_eq!(metrics.dropped(), 2);
    assert_eq!(h.mailbox.for_token("t2").len(), 1);
    assert!(h.mailbox.for_token("t3").is_empty());
}

#[test]
fn test_unbounded_queue_never_drops() {
    let mut h = Harness::new(WorkerConfig::new());
    for i in 0..200 {
        h.worker.submit(sql("SELECT 1"), "client", &format!("t{i}"));
    }
    assert_eq!(h.worker.metrics().queued(), 200);
    assert_eq!(h.worker.metrics().dropped(), 0);
    assert!(h.mailbox.all().is_empty());
}

#[test]
fn test_batched_submissions_are_not_reported() {
    let mut h = Harness::with_primary(WorkerConfig::new().batch_size(2), 1);
    h.worker.submit(sql("a"), "client", "t1");
    h.worker.submit(sql("b"), "client", "t2");
    h.tick();
    assert_eq!(
        h.handle(PoolRole::Primary, 0).sent(),
        vec![vec!["a".to_string(), "b".to_string()]]
    );

    h.poll(PoolRole::Primary, 0);
    assert_eq!(h.worker.metrics().finished(), 2);
    assert!(h.mailbox.all().is_empty());
    h.assert_gauges();
}

#[test]
fn test_result_reaches_producer() {
    let mut h = Harness::with_primary(WorkerConfig::new(), 1);
    h.worker.submit(sql("SELECT 1"), "client", "t1");
    h.tick();
    h.poll(PoolRole::Primary, 0);

    let posted = h.mailbox.all();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].0, "client");
    assert!(posted[0].1.is_result());
    assert_eq!(posted[0].1.token(), "t1");
    assert_eq!(h.worker.metrics().finished(), 1);
}

#[test]
fn test_anonymous_submission_is_silent() {
    let mut h = Harness::with_primary(WorkerConfig::new(), 1);
    h.worker.submit(sql("SELECT 1"), "", "t1");
    h.tick();
    h.poll(PoolRole::Primary, 0);
    assert!(h.mailbox.all().is_empty());
    assert_eq!(h.worker.metrics().finished(), 1);
}

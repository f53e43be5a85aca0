//! Randomized operation sequences against the scheduler's bookkeeping.

mod fixtures;

use std::collections::HashMap;

use fixtures::*;
use pgmux_core::Clock;
use pgmux_pool::mock::MockReply;
use pgmux_pool::{PoolRole, WorkerConfig};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Submit { statements: usize, chained: bool },
    Script { conn: usize, reply: u8 },
    Poll(usize),
    Disconnect(usize),
    Advance(u64),
}

/// Connections 0 and 1 are primary, 2 is secondary.
fn locate(conn: usize) -> (PoolRole, usize) {
    if conn < 2 {
        (PoolRole::Primary, conn)
    } else {
        (PoolRole::Secondary, 0)
    }
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..4, any::<bool>())
            .prop_map(|(statements, chained)| Op::Submit { statements, chained }),
        2 => (0usize..3, 0u8..5).prop_map(|(conn, reply)| Op::Script { conn, reply }),
        3 => (0usize..3).prop_map(Op::Poll),
        1 => (0usize..3).prop_map(Op::Disconnect),
        2 => (0u64..1500).prop_map(Op::Advance),
    ]
}

fn arb_config() -> impl Strategy<Value = WorkerConfig> {
    (
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        1usize..4,
        0usize..8,
    )
        .prop_map(|(retry, failover, pipelining, batch, capacity)| {
            WorkerConfig::new()
                .retry_enabled(retry)
                .failover_to_secondary(failover)
                .pipelining_enabled(pipelining)
                .batch_size(batch)
                .queue_capacity(capacity)
                .transaction_wait_timeout(1000)
                .retry_interval(200)
                .reconnect_interval(300)
        })
}

fn reply(kind: u8) -> MockReply {
    match kind {
        0 => MockReply::Ok(serde_json::json!([{"n": 1}])),
        1 => MockReply::error("could not serialize access", None),
        2 => MockReply::error("terminating connection", Some("57P01")),
        3 => MockReply::Hang,
        _ => MockReply::fail_at(1, "unique violation"),
    }
}

proptest! {
    /// Property: gauges, connection slots and outcome counts stay consistent
    /// under any interleaving of submissions, replies and failures.
    #[test]
    fn prop_bookkeeping_is_consistent(
        config in arb_config(),
        ops in prop::collection::vec(arb_op(), 1..80),
    ) {
        let mut h = Harness::with_primary(config, 2);
        h.add_pool(PoolRole::Secondary, 1);
        let mut token = 0usize;

        for op in ops {
            match op {
                Op::Submit { statements, chained } => {
                    token += 1;
                    let texts: Vec<String> =
                        (0..statements).map(|i| format!("INSERT {token}.{i}")).collect();
                    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                    let tx = if chained { fixtures::chained(&refs) } else { plain(&refs) };
                    h.worker.submit(tx, "client", &format!("t{token}"));
                }
                Op::Script { conn, reply: kind } => {
                    let (role, index) = locate(conn);
                    h.handle(role, index).push_reply(reply(kind));
                }
                Op::Poll(conn) => {
                    let (role, index) = locate(conn);
                    h.poll(role, index);
                }
                Op::Disconnect(conn) => {
                    let (role, index) = locate(conn);
                    h.handle(role, index).disconnect();
                    h.poll(role, index);
                }
                Op::Advance(ms) => h.clock.advance_ms(ms),
            }
            if h.worker.next_tick().is_some_and(|at| at <= h.clock.now()) {
                h.tick();
            }

            let metrics = h.worker.metrics();
            prop_assert_eq!(metrics.queued(), h.worker.queued_statements());
            prop_assert_eq!(metrics.retrying(), h.worker.retrying_statements());
            prop_assert_eq!(metrics.active(), h.worker.active_statements());
            let capacity = h.worker.config().queue_capacity;
            if capacity > 0 {
                prop_assert!(metrics.queued() <= capacity);
            }

            let running = h
                .worker
                .connection_ids()
                .into_iter()
                .filter_map(|id| h.worker.connection(id))
                .filter(|conn| conn.has_current())
                .count();
            prop_assert_eq!(running, h.worker.active_len());

            for role in [PoolRole::Primary, PoolRole::Secondary] {
                let pool = h.worker.pool(role).unwrap();
                prop_assert!(pool.connected_count() <= pool.len());
            }

            let mut per_token: HashMap<String, usize> = HashMap::new();
            for (_, outcome) in h.mailbox.all() {
                *per_token.entry(outcome.token().to_string()).or_default() += 1;
            }
            prop_assert!(per_token.values().all(|n| *n == 1), "duplicate outcome: {:?}", per_token);
        }
    }
}

//! End-to-end scenarios from the turn-lifecycle testable-properties list:
//! a dispatcher call plus a `FakeWorker::emit` drives a tracked turn, and
//! the assertions read back whatever landed in a live connection's outbox.

#![allow(clippy::expect_used, clippy::panic)]

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

use turnhub::config::CoordinatorConfig;
use turnhub::connection::ConnId;
use turnhub::rpc::HandlerContext;
use turnhub::state::CoordinatorState;
use turnhub_specs::FakeWorker;

fn base_config() -> CoordinatorConfig {
    CoordinatorConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        auth_token: None,
        max_connections: 4,
        conn_outbox_size: 8,
        conn_backlog_cut: 6,
        write_deadline_ms: 1000,
        turn_watchdog_secs: 600,
        stall_threshold_secs: 60,
        turn_summary_ttl_secs: 1800,
        turn_summary_cache_cap: 64,
        ui_state_throttle_ms: 50,
        orchestration_report_ttl_secs: 1800,
        worker_program: "true".to_owned(),
        worker_args: Vec::new(),
    }
}

async fn setup(config: CoordinatorConfig) -> (std::sync::Arc<CoordinatorState>, ConnId, mpsc::Receiver<Vec<u8>>) {
    let (state, channels) = CoordinatorState::new(config);
    turnhub::spawn_background_tasks(state.clone(), channels).await;
    let (conn_id, rx) = state.hub.accept().await.expect("accept connection");
    (state, conn_id, rx)
}

fn ctx(state: &std::sync::Arc<CoordinatorState>, conn_id: ConnId) -> HandlerContext {
    HandlerContext { state: state.clone(), conn_id }
}

/// Drain the outbox until a notification whose `method` equals `method` is
/// found, or the deadline passes.
async fn expect_notification(rx: &mut mpsc::Receiver<Vec<u8>>, method: &str) -> Value {
    timeout(Duration::from_secs(2), async {
        loop {
            let bytes = rx.recv().await.expect("outbox closed before notification arrived");
            let value: Value = serde_json::from_slice(&bytes).expect("notification is valid json");
            if value.get("method").and_then(Value::as_str) == Some(method) {
                return value;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {method}"))
}

#[tokio::test]
async fn basic_turn_completes_exactly_once() {
    let (state, conn_id, mut rx) = setup(base_config()).await;
    let worker = FakeWorker::new("a1");
    state.workers.insert("a1", worker.clone()).await;

    let params = json!({ "threadId": "a1", "input": [{ "type": "text", "text": "hi" }] });
    let result = turnhub::methods::turn_methods::turn_start(ctx(&state, conn_id), Some(params))
        .await
        .expect("turn_start succeeds");
    assert_eq!(result["turn"]["status"], "inProgress");

    worker.emit(json!({ "type": "agent_message_delta", "text": "thinking" }));
    worker.emit(json!({ "type": "turn_complete", "status": "completed" }));

    let completed = expect_notification(&mut rx, "turn/completed").await;
    assert_eq!(completed["params"]["threadId"], "a1");
    assert_eq!(completed["params"]["status"], "completed");
    assert_eq!(completed["params"]["reason"], "turn_complete");
    assert!(!state.tracker.is_active("a1"));
}

#[tokio::test]
async fn interrupt_during_thinking_confirms_and_completes_interrupted() {
    let (state, conn_id, mut rx) = setup(base_config()).await;
    let worker = FakeWorker::new("a2");
    state.workers.insert("a2", worker.clone()).await;

    turnhub::methods::turn_methods::turn_start(
        ctx(&state, conn_id),
        Some(json!({ "threadId": "a2", "input": [{ "type": "text", "text": "hi" }] })),
    )
    .await
    .expect("turn_start succeeds");

    let state_for_worker = state.clone();
    let worker_for_abort = worker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = state_for_worker;
        worker_for_abort.emit(json!({ "type": "turn_aborted", "reason": "turn_aborted" }));
    });

    let interrupt = turnhub::methods::turn_methods::turn_interrupt(
        ctx(&state, conn_id),
        Some(json!({ "threadId": "a2" })),
    )
    .await
    .expect("turn_interrupt succeeds");

    assert_eq!(interrupt["confirmed"], true);
    assert_eq!(interrupt["mode"], "interrupt_confirmed");
    assert_eq!(interrupt["interruptSent"], true);
    assert!(worker.was_interrupted());

    let aborted = expect_notification(&mut rx, "turn/aborted").await;
    assert_eq!(aborted["params"]["status"], "interrupted");
    assert_eq!(aborted["params"]["reason"], "turn_aborted");
    assert_eq!(aborted["params"]["turn"]["status"], "interrupted");
}

#[tokio::test(start_paused = true)]
async fn stall_auto_interrupts_after_grace_period() {
    let mut config = base_config();
    config.stall_threshold_secs = 60;
    let (state, conn_id, mut rx) = setup(config).await;
    let worker = FakeWorker::new("a3");
    state.workers.insert("a3", worker.clone()).await;

    turnhub::methods::turn_methods::turn_start(
        ctx(&state, conn_id),
        Some(json!({ "threadId": "a3", "input": [{ "type": "text", "text": "hi" }] })),
    )
    .await
    .expect("turn_start succeeds");

    tokio::time::advance(Duration::from_secs(90)).await;
    let warning = expect_notification(&mut rx, "turn/stall").await;
    assert_eq!(warning["params"]["kind"], "Warning");

    tokio::time::advance(Duration::from_secs(31)).await;
    let alert = expect_notification(&mut rx, "turn/stall").await;
    assert_eq!(alert["params"]["kind"], "AutoInterrupted");
    assert!(worker.was_interrupted());
}

#[tokio::test]
async fn superseded_turn_completes_with_superseded_reason() {
    let (state, conn_id, mut rx) = setup(base_config()).await;
    let worker = FakeWorker::new("a4");
    state.workers.insert("a4", worker.clone()).await;

    turnhub::methods::turn_methods::turn_start(
        ctx(&state, conn_id),
        Some(json!({ "threadId": "a4", "input": [] })),
    )
    .await
    .expect("first turn_start succeeds");

    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = turnhub::methods::turn_methods::turn_start(
        ctx(&state, conn_id),
        Some(json!({ "threadId": "a4", "input": [] })),
    )
    .await
    .expect("second turn_start succeeds");

    let superseded = expect_notification(&mut rx, "turn/completed").await;
    assert_eq!(superseded["params"]["status"], "failed");
    assert_eq!(superseded["params"]["reason"], "superseded_by_new_turn");
    assert!(second["turn"]["id"].as_str().is_some());
}

#[tokio::test]
async fn approval_without_connected_clients_fails_closed() {
    let config = base_config();
    let (state, only_conn, _rx) = setup(config).await;
    // Disconnect the only live connection so the broker has nothing to relay to.
    state.hub.disconnect(only_conn).await;

    let worker = FakeWorker::new("a5");
    state.workers.insert("a5", worker.clone()).await;

    let decision = state
        .approval
        .resolve(worker.as_ref(), "a5", "exec_approval_request", "call-1", json!({ "command": "rm -rf /tmp/x" }))
        .await;

    assert_eq!(decision, turnhub::approval::ApprovalDecision::Denied);
    assert_eq!(worker.denials(), vec![("call-1".to_owned(), "denied".to_owned())]);
}

#[tokio::test]
async fn connection_overload_disconnects_the_slow_client() {
    let mut config = base_config();
    config.conn_outbox_size = 2;
    let (state, first_conn, _first_rx) = setup(config).await;
    state.hub.disconnect(first_conn).await;

    // `slow_rx` is kept alive but never drained, so its outbox fills up and
    // the next broadcast past capacity finds it `Full`.
    let (slow_conn, _slow_rx) = state.hub.accept().await.expect("accept slow connection");
    let (healthy_conn, mut healthy_rx) = state.hub.accept().await.expect("accept healthy connection");

    for n in 0..4u8 {
        state.hub.broadcast(serde_json::to_vec(&json!({ "n": n })).expect("serialize")).await;
        let received = healthy_rx.recv().await.expect("healthy connection still receives broadcasts");
        let value: Value = serde_json::from_slice(&received).expect("valid json");
        assert_eq!(value["n"], n);
    }

    assert!(!state.hub.is_live(slow_conn));
    assert!(state.hub.is_live(healthy_conn));
}

// SPDX-License-Identifier: BUSL-1.1

//! Agent Session & Turn Coordinator: a JSON-RPC hub that multiplexes several
//! UI clients onto a pool of worker subprocesses, tracking each agent's
//! current turn and relaying approvals between them.

pub mod approval;
pub mod audit;
pub mod binding;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod methods;
pub mod orchestration;
pub mod panic_guard;
pub mod recovery;
pub mod rpc;
pub mod skills;
pub mod state;
pub mod transport;
pub mod turn;
pub mod ui_state;
pub mod worker;

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::CoordinatorConfig;
use crate::events::normalizer::{self, UiType};
use crate::rpc::envelope::RpcNotification;
use crate::state::{CoordinatorChannels, CoordinatorState};
use crate::turn::{classify_terminal_event, TrackerEvent};
use crate::ui_state::UiStateThrottle;
use crate::worker::WorkerEvent;

fn extract_call_id(payload: &Value) -> Option<String> {
    payload.get("callId").or_else(|| payload.get("approvalId")).and_then(Value::as_str).map(str::to_owned)
}

fn event_type_of(payload: &Value) -> String {
    payload
        .get("type")
        .or_else(|| payload.get("method"))
        .or_else(|| payload.get("event"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_owned()
}

/// Broadcast a notification, first feeding it through the UI-state throttle
/// (§4.9) so ordinary turn/agent activity also drives `ui/state/changed`.
async fn broadcast_notification(state: &Arc<CoordinatorState>, notification: RpcNotification) {
    if let Some(params) = &notification.params {
        if UiStateThrottle::should_trigger(&notification.method, params) {
            state.ui_state.notify(params.clone());
        }
    }
    if let Ok(bytes) = serde_json::to_vec(&notification) {
        state.hub.broadcast(bytes).await;
    }
}

/// Drive one worker event to completion: normalize it, settle the turn if it
/// is terminal, relay approvals and dynamic-tool calls, and broadcast
/// everything else as a plain UI notification (§4.5–§4.7).
async fn handle_worker_event(state: &Arc<CoordinatorState>, event: WorkerEvent) {
    let normalized = {
        let mut memo = state.file_memo();
        normalizer::normalize(&event.agent_id, &event.payload, &mut memo)
    };

    if let Some(classification) = classify_terminal_event(&normalized.event_type, &event.payload) {
        state.tracker.complete_from_event(&event.agent_id, None, classification, &normalized.payload);
        for requester in state.orchestration.drain(&event.agent_id) {
            let notification = RpcNotification::new(
                "orchestration/report",
                serde_json::json!({ "fromAgentId": event.agent_id, "toAgentId": requester }),
            );
            broadcast_notification(state, notification).await;
        }
        return;
    }

    match normalized.ui_type {
        UiType::ApprovalRequest => {
            let Some(call_id) = extract_call_id(&event.payload) else {
                warn!(agent_id = %event.agent_id, "approval event carried no call id, dropping");
                return;
            };
            let Some(worker) = state.workers.get(&event.agent_id).await else { return };
            let method = event_type_of(&event.payload);
            let state = state.clone();
            let agent_id = event.agent_id.clone();
            let payload = event.payload.clone();
            tokio::spawn(async move {
                state.approval.resolve(worker.as_ref(), &agent_id, &method, &call_id, payload).await;
            });
        }
        UiType::ToolCall => {
            if let Some(call) = approval::parse_dynamic_tool_call(&event.payload) {
                let Some(worker) = state.workers.get(&event.agent_id).await else { return };
                let state = state.clone();
                let agent_id = event.agent_id.clone();
                tokio::spawn(async move {
                    let result = state.dynamic_tools.dispatch(&agent_id, call).await;
                    let payload = serde_json::json!({ "text": result.text, "success": result.success });
                    if let Err(e) = worker.respond(&result.call_id, payload).await {
                        warn!(%agent_id, error = %e, "failed to deliver dynamic tool result to worker");
                    }
                });
            }
        }
        _ => {
            let notification = RpcNotification::new("agent/event", normalized.payload);
            broadcast_notification(state, notification).await;
        }
    }
}

/// Build the narrow, standalone completion shape used for synthetic
/// completions (§4.6: "published as an explicit `turn/completed`
/// notification").
fn synthetic_completion_notification(c: &crate::turn::TurnCompletion) -> RpcNotification {
    RpcNotification::new(
        "turn/completed",
        serde_json::json!({
            "agentId": &c.agent_id,
            "threadId": &c.agent_id,
            "turnId": &c.turn_id,
            "status": &c.status,
            "reason": &c.reason,
            "synthetic": c.synthetic,
            "summary": &c.summary,
        }),
    )
}

fn tracker_event_to_notification(event: TrackerEvent) -> RpcNotification {
    match event {
        TrackerEvent::Completion(c) => {
            let Some(payload) = c.event_payload.as_ref().filter(|_| !c.synthetic) else {
                return synthetic_completion_notification(&c);
            };
            // Non-synthetic completion: merge the completion fields into the
            // in-flight event payload so the outgoing notification carries
            // both meanings (§4.6).
            let mut merged = payload.clone();
            if let Value::Object(map) = &mut merged {
                map.insert("agentId".to_owned(), serde_json::json!(&c.agent_id));
                map.insert("threadId".to_owned(), serde_json::json!(&c.agent_id));
                map.insert("turnId".to_owned(), serde_json::json!(&c.turn_id));
                map.insert("status".to_owned(), serde_json::json!(&c.status));
                map.insert("reason".to_owned(), serde_json::json!(&c.reason));
                map.insert("synthetic".to_owned(), serde_json::json!(c.synthetic));
                if let Some(summary) = &c.summary {
                    map.insert("summary".to_owned(), serde_json::json!(summary));
                }
                map.insert(
                    "turn".to_owned(),
                    serde_json::json!({
                        "id": &c.turn_id,
                        "status": &c.status,
                        "reason": &c.reason,
                        "summary": &c.summary,
                    }),
                );
            }
            RpcNotification::new(c.notification_method, merged)
        }
        TrackerEvent::StallAlert(a) => RpcNotification::new(
            "turn/stall",
            serde_json::json!({
                "agentId": a.agent_id,
                "turnId": a.turn_id,
                "kind": format!("{:?}", a.kind),
                "graceRemainingMs": a.grace_remaining.as_millis(),
            }),
        ),
    }
}

async fn run_tracker_events_forwarder(
    state: Arc<CoordinatorState>,
    mut tracker_events: tokio::sync::mpsc::UnboundedReceiver<TrackerEvent>,
) {
    while let Some(event) = tracker_events.recv().await {
        let notification = tracker_event_to_notification(event);
        broadcast_notification(&state, notification).await;
    }
}

async fn run_ui_state_emits_forwarder(
    state: Arc<CoordinatorState>,
    mut ui_state_emits: tokio::sync::mpsc::UnboundedReceiver<Value>,
) {
    while let Some(payload) = ui_state_emits.recv().await {
        let notification = RpcNotification::new("ui/state/changed", payload);
        if let Ok(bytes) = serde_json::to_vec(&notification) {
            state.hub.broadcast(bytes).await;
        }
    }
}

async fn run_worker_events_forwarder(
    state: Arc<CoordinatorState>,
    mut worker_events: tokio::sync::mpsc::UnboundedReceiver<WorkerEvent>,
) {
    while let Some(event) = worker_events.recv().await {
        handle_worker_event(&state, event).await;
    }
}

/// Spawn the three forwarders that turn tracker/throttle/worker events into
/// outbound notifications. Exposed so integration tests can drive a
/// [`CoordinatorState`] end to end without going through [`run`].
pub async fn spawn_background_tasks(state: Arc<CoordinatorState>, channels: CoordinatorChannels) {
    let CoordinatorChannels { tracker_events, ui_state_emits, worker_events } = channels;

    let tracker_state = state.clone();
    tokio::spawn(panic_guard::guard("tracker_events_forwarder", run_tracker_events_forwarder(tracker_state, tracker_events)));

    let ui_state = state.clone();
    tokio::spawn(panic_guard::guard("ui_state_emits_forwarder", run_ui_state_emits_forwarder(ui_state, ui_state_emits)));

    let worker_state = state.clone();
    tokio::spawn(panic_guard::guard("worker_events_forwarder", run_worker_events_forwarder(worker_state, worker_events)));
}

/// Build the coordinator's shared state, spawn its background forwarders,
/// and serve the HTTP/WS surface until shutdown is requested.
pub async fn run(config: CoordinatorConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let (state, channels) = CoordinatorState::new(config);
    let shutdown = state.shutdown.clone();

    spawn_background_tasks(state.clone(), channels).await;

    let router = transport::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "coordinator listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("coordinator shutting down");
        })
        .await?;

    Ok(())
}

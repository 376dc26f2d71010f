// SPDX-License-Identifier: BUSL-1.1

//! Typed handlers for the turn-lifecycle methods (§6 "Selected method
//! contracts").

use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::CoordinatorError;
use crate::recovery::{self, RecoveryOutcome};
use crate::rpc::HandlerContext;
use crate::turn::InterruptMode;
use crate::worker::SubmitOptions;

const INTERRUPT_SETTLE: Duration = Duration::from_secs(6);

fn invalid_params(params: Option<&Value>, field: &str) -> CoordinatorError {
    CoordinatorError::InvalidParams(format!("missing or malformed `{field}` in {params:?}"))
}

fn decode<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, CoordinatorError> {
    let value = params.unwrap_or(Value::Null);
    serde_json::from_value(value.clone()).map_err(|_| invalid_params(Some(&value), "params"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TurnStartParams {
    thread_id: String,
    #[serde(default)]
    input: Vec<Value>,
    #[serde(default)]
    selected_skills: Vec<String>,
    #[serde(default)]
    manual_skill_selection: bool,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    output_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TurnSteerParams {
    thread_id: String,
    #[serde(default)]
    input: Vec<Value>,
    #[serde(default)]
    selected_skills: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadIdParams {
    thread_id: String,
}

/// `turn/start`: ensures a worker is ready (resuming history if necessary),
/// begins a tracked turn, submits the input, and returns the new turn id.
pub async fn turn_start(ctx: HandlerContext, params: Option<Value>) -> Result<Value, CoordinatorError> {
    let params: TurnStartParams = decode(params)?;
    let state = ctx.state;

    if !state.workers.is_running(&params.thread_id).await {
        let binding = state.bindings.get(&params.thread_id).await;
        let history: Vec<String> = binding.iter().map(|b| b.codex_thread_id.clone()).collect();
        recovery::recover(
            &state.workers,
            state.bindings.as_ref(),
            &state.ui_state,
            &params.thread_id,
            &params.thread_id,
            &state.config.launch_spec(params.cwd.clone()),
            &history,
        )
        .await?;
    }

    if !params.selected_skills.is_empty() || params.manual_skill_selection {
        state.skills.set(&params.thread_id, params.selected_skills.clone()).await;
    }

    let worker = state
        .workers
        .get(&params.thread_id)
        .await
        .ok_or_else(|| CoordinatorError::NotFound(format!("no worker for {}", params.thread_id)))?;

    let turn_id = state.tracker.begin(state.workers.clone(), &params.thread_id, None).await;

    let opts = SubmitOptions { images: Vec::new(), files: Vec::new(), output_schema: params.output_schema };
    worker.submit(params.input, opts).await?;

    Ok(json!({ "turn": { "id": turn_id, "status": "inProgress" } }))
}

/// `turn/steer`: feed more input into an already-active turn without
/// disturbing its tracked lifecycle.
pub async fn turn_steer(ctx: HandlerContext, params: Option<Value>) -> Result<Value, CoordinatorError> {
    let params: TurnSteerParams = decode(params)?;
    let state = ctx.state;

    if !params.selected_skills.is_empty() {
        state.skills.set(&params.thread_id, params.selected_skills.clone()).await;
    }

    let worker = state
        .workers
        .get(&params.thread_id)
        .await
        .ok_or_else(|| CoordinatorError::NotFound(format!("no worker for {}", params.thread_id)))?;
    worker.submit(params.input, SubmitOptions::default()).await?;

    Ok(json!({}))
}

/// `turn/interrupt`: best-effort worker interrupt, then settle up to
/// [`INTERRUPT_SETTLE`] observing the tracker's done-channel (§4.6 step 3).
pub async fn turn_interrupt(ctx: HandlerContext, params: Option<Value>) -> Result<Value, CoordinatorError> {
    let params: ThreadIdParams = decode(params)?;
    let state = ctx.state;

    let active_before = state.tracker.is_active(&params.thread_id);
    if !active_before {
        // The tracker has nothing recorded, but the worker supervisor may
        // still believe a session is live (§4.6 step 2: "state indicates
        // active (either UI runtime or tracker says so)"). Best-effort
        // interrupt it anyway and synthesize the completion the flow
        // promises rather than silently reporting nothing to interrupt.
        let worker_running = state.workers.is_running(&params.thread_id).await;
        if worker_running {
            if let Some(worker) = state.workers.get(&params.thread_id).await {
                let _ = worker.interrupt().await;
            }
            state.tracker.publish_synthetic_completion(
                &params.thread_id,
                None,
                "interrupted",
                "interrupt_no_active_turn",
            );
            return Ok(json!({
                "confirmed": true,
                "mode": mode_name(InterruptMode::NoActiveTurn),
                "interruptSent": true,
                "stateBefore": "absent",
                "stateAfter": "absent",
                "waitedMs": 0,
                "activeObserved": true,
            }));
        }
        return Ok(json!({
            "confirmed": false,
            "mode": mode_name(InterruptMode::NoActiveTurn),
            "interruptSent": false,
            "stateBefore": "absent",
            "stateAfter": "absent",
            "waitedMs": 0,
            "activeObserved": false,
        }));
    }

    let interrupt_sent = match state.workers.get(&params.thread_id).await {
        Some(worker) => worker.interrupt().await.is_ok(),
        None => false,
    };
    state.tracker.mark_interrupt(&params.thread_id);

    let started = Instant::now();
    let status = state.tracker.wait_for_completion(&params.thread_id, INTERRUPT_SETTLE).await;
    let waited_ms = started.elapsed().as_millis();

    let (confirmed, mode) = match status.as_deref() {
        Some("interrupted") => (true, InterruptMode::InterruptConfirmed),
        Some("completed") => (true, InterruptMode::InterruptTerminalCompleted),
        Some("failed") => (true, InterruptMode::InterruptTerminalFailed),
        Some(_) => (true, InterruptMode::InterruptConfirmed),
        None => (false, InterruptMode::InterruptTimeout),
    };

    Ok(json!({
        "confirmed": confirmed,
        "mode": mode_name(mode),
        "interruptSent": interrupt_sent,
        "stateBefore": "active",
        "stateAfter": if status.is_some() { "absent" } else { "active" },
        "waitedMs": waited_ms,
        "activeObserved": active_before,
    }))
}

/// `turn/forceComplete`: superset of interrupt — best-effort `/interrupt`
/// followed by an unconditional tracker completion (§4.6 step 4).
pub async fn turn_force_complete(ctx: HandlerContext, params: Option<Value>) -> Result<Value, CoordinatorError> {
    let params: ThreadIdParams = decode(params)?;
    let state = ctx.state;

    if let Some(worker) = state.workers.get(&params.thread_id).await {
        let _ = worker.interrupt().await;
    }
    state.tracker.force_complete(&params.thread_id, "interrupted", "force_complete", true).await;

    Ok(json!({ "confirmed": true, "forceCompleted": true }))
}

/// `thread/resume`: idempotent session recovery entry point for a UI that
/// reconnects to a dormant agent directly (outside of `turn/start`).
pub async fn thread_resume(ctx: HandlerContext, params: Option<Value>) -> Result<Value, CoordinatorError> {
    let params: ThreadIdParams = decode(params)?;
    let state = ctx.state;

    let binding = state.bindings.get(&params.thread_id).await;
    let history: Vec<String> = binding.iter().map(|b| b.codex_thread_id.clone()).collect();
    let outcome = recovery::recover(
        &state.workers,
        state.bindings.as_ref(),
        &state.ui_state,
        &params.thread_id,
        &params.thread_id,
        &state.config.launch_spec(None),
        &history,
    )
    .await?;

    let (thread_id, session_lost) = match outcome {
        RecoveryOutcome::AlreadyRunning { worker } => (worker.thread_id().unwrap_or_else(|| params.thread_id.clone()), false),
        RecoveryOutcome::Resumed { thread_id, .. } => (thread_id, false),
        RecoveryOutcome::Relaunched { thread_id, session_lost, .. } => (thread_id, session_lost),
    };

    Ok(json!({ "threadId": thread_id, "sessionLost": session_lost }))
}

fn mode_name(mode: InterruptMode) -> &'static str {
    match mode {
        InterruptMode::InterruptConfirmed => "interrupt_confirmed",
        InterruptMode::InterruptTerminalCompleted => "interrupt_terminal_completed",
        InterruptMode::InterruptTerminalFailed => "interrupt_terminal_failed",
        InterruptMode::InterruptTimeout => "interrupt_timeout",
        InterruptMode::NoActiveTurn => "no_active_turn",
    }
}

#[cfg(test)]
#[path = "turn_methods_tests.rs"]
#[allow(clippy::expect_used)]
mod tests;

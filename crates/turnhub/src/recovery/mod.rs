// SPDX-License-Identifier: BUSL-1.1

//! Session Recovery (C8): reopen a known agent behind a fresh worker,
//! replaying a prioritized candidate list of historical thread ids.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::binding::{Binding, BindingStore};
use crate::error::CoordinatorError;
use crate::ui_state::UiStateThrottle;
use crate::worker::{LaunchSpec, WorkerHandle, WorkerSupervisor};

/// `ensureThreadReadyForTurn` total budget (§5).
pub const RECOVERY_BUDGET: Duration = Duration::from_secs(45);

pub fn is_native_thread_id(candidate: &str) -> bool {
    uuid::Uuid::parse_str(candidate).is_ok()
}

/// Non-empty for any non-empty input (§8 invariant): native id ⇒ `[input]`;
/// otherwise the de-duplicated resolved list, falling back to `[input]` if
/// that list is empty. Never returns empty, never silently resumes fresh.
pub fn build_resume_candidates(input: &str, resolved: &[String]) -> Vec<String> {
    if is_native_thread_id(input) {
        return vec![input.to_owned()];
    }
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for id in resolved {
        if seen.insert(id.clone()) {
            out.push(id.clone());
        }
    }
    if out.is_empty() {
        vec![input.to_owned()]
    } else {
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeErrorKind {
    Candidate,
    ProcessCrash,
    Other,
}

/// Preserves the documented asymmetry (§9 Open Question): a message
/// mentioning "unexpected EOF" is always a candidate error (even if it also
/// mentions close-1006/abnormal-closure wording); only messages that mention
/// close-1006/abnormal-closure *without* "unexpected EOF" are process-crash
/// errors.
fn classify_resume_error(message: &str) -> ResumeErrorKind {
    let m = message.to_lowercase();
    if m.contains("unexpected eof") {
        return ResumeErrorKind::Candidate;
    }
    if m.contains("close 1006") || m.contains("close-1006") || m.contains("abnormal closure") {
        return ResumeErrorKind::ProcessCrash;
    }
    if m.contains("no rollout found") || m.contains("rollout not found") || m.contains("invalid thread id") || m.contains("invalid id") {
        return ResumeErrorKind::Candidate;
    }
    ResumeErrorKind::Other
}

#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    AlreadyRunning { worker: Arc<dyn WorkerHandle> },
    Resumed { thread_id: String, worker: Arc<dyn WorkerHandle> },
    Relaunched { thread_id: String, worker: Arc<dyn WorkerHandle>, session_lost: bool },
}

fn session_lost_payload(agent_id: &str, detail: &str) -> serde_json::Value {
    serde_json::json!({
        "source": "session_lost_warning",
        "agent_id": agent_id,
        "warning": true,
        "detail": detail,
    })
}

/// On `turn/start` for an agent with no live worker: launch fresh and
/// replay candidates until one resumes (§4.8). Bounded by
/// [`RECOVERY_BUDGET`].
pub async fn recover(
    supervisor: &WorkerSupervisor,
    bindings: &dyn BindingStore,
    ui_state: &Arc<UiStateThrottle>,
    agent_id: &str,
    input_thread_id: &str,
    launch_spec: &LaunchSpec,
    history: &[String],
) -> Result<RecoveryOutcome, CoordinatorError> {
    tokio::time::timeout(
        RECOVERY_BUDGET,
        recover_inner(supervisor, bindings, ui_state, agent_id, input_thread_id, launch_spec, history),
    )
    .await
    .map_err(|_| CoordinatorError::Timeout("session recovery exceeded its budget".to_owned()))?
}

async fn recover_inner(
    supervisor: &WorkerSupervisor,
    bindings: &dyn BindingStore,
    ui_state: &Arc<UiStateThrottle>,
    agent_id: &str,
    input_thread_id: &str,
    launch_spec: &LaunchSpec,
    history: &[String],
) -> Result<RecoveryOutcome, CoordinatorError> {
    if let Some(existing) = supervisor.get(agent_id).await {
        return Ok(RecoveryOutcome::AlreadyRunning { worker: existing });
    }

    let binding = bindings.get(agent_id).await;
    let known = is_native_thread_id(input_thread_id) || binding.is_some() || !history.is_empty();
    if !known {
        return Err(CoordinatorError::NotFound(format!("agent {agent_id} has no known history")));
    }

    let mut resolved = Vec::new();
    if let Some(b) = &binding {
        resolved.push(b.codex_thread_id.clone());
    }
    resolved.extend(history.iter().cloned());
    let candidates = build_resume_candidates(input_thread_id, &resolved);
    let preview: Vec<&String> = candidates.iter().take(4).collect();
    info!(%agent_id, ?preview, total = candidates.len(), "resume candidates built");

    let worker = supervisor.launch(agent_id, launch_spec).await?;

    let mut last_candidate_error = None;
    for candidate in &candidates {
        match worker.resume_thread(candidate, launch_spec.cwd.as_deref()).await {
            Ok(()) => {
                bindings
                    .put(Binding { agent_id: agent_id.to_owned(), codex_thread_id: candidate.clone(), session_lost: false })
                    .await;
                return Ok(RecoveryOutcome::Resumed { thread_id: candidate.clone(), worker });
            }
            Err(e) => {
                let message = e.to_string();
                match classify_resume_error(&message) {
                    ResumeErrorKind::Candidate => {
                        last_candidate_error = Some(message);
                        continue;
                    }
                    ResumeErrorKind::ProcessCrash => {
                        supervisor.stop(agent_id).await;
                        ui_state.notify(session_lost_payload(agent_id, &message));
                        return Err(CoordinatorError::WorkerCrash(message));
                    }
                    ResumeErrorKind::Other => return Err(CoordinatorError::Internal(message)),
                }
            }
        }
    }

    // All candidates exhausted with non-crash errors: stop, relaunch once,
    // and surface session-loss as a notification rather than an RPC error
    // (§9 "Session-lost is a notification, not an error").
    supervisor.stop(agent_id).await;
    let worker = supervisor.launch(agent_id, launch_spec).await?;
    let detail = last_candidate_error.unwrap_or_else(|| "no resumable session history".to_owned());
    ui_state.notify(session_lost_payload(agent_id, &detail));
    bindings
        .put(Binding { agent_id: agent_id.to_owned(), codex_thread_id: input_thread_id.to_owned(), session_lost: true })
        .await;
    Ok(RecoveryOutcome::Relaunched { thread_id: input_thread_id.to_owned(), worker, session_lost: true })
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
#[allow(clippy::expect_used)]
mod tests;

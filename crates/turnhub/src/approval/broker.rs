// SPDX-License-Identifier: BUSL-1.1

//! Approval & Dynamic-Tool Broker (C7), approval half: fail-closed relay of
//! a worker's approval request to a connected frontend, with a heartbeat
//! that keeps the turn tracker from treating the wait as silence (§4.7).

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::audit::{AuditEvent, AuditSink};
use crate::connection::ConnectionHub;
use crate::rpc::Correlator;
use crate::turn::TurnTracker;
use crate::worker::WorkerHandle;

/// Heartbeat floor while waiting on an approval reply (§4.7
/// "heartbeat interval = max(stallThreshold / 6, 10s)").
pub fn heartbeat_interval(stall_threshold: Duration) -> Duration {
    (stall_threshold / 6).max(Duration::from_secs(10))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
}

/// Tracks in-flight `(agent_id, method, approval_id)` triples so a duplicate
/// approval event for the same call is rejected rather than double-relayed
/// (§4.7 step 1).
#[derive(Default)]
pub struct ApprovalDedup {
    inflight: Mutex<HashSet<(String, String, String)>>,
}

impl ApprovalDedup {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<(String, String, String)>> {
        self.inflight.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Returns `true` if this key was not already in flight (and marks it
    /// as such); `false` means reject as a concurrent duplicate.
    fn begin(&self, agent_id: &str, method: &str, approval_id: &str) -> bool {
        self.lock().insert((agent_id.to_owned(), method.to_owned(), approval_id.to_owned()))
    }

    fn end(&self, agent_id: &str, method: &str, approval_id: &str) {
        self.lock().remove(&(agent_id.to_owned(), method.to_owned(), approval_id.to_owned()));
    }
}

pub struct ApprovalBroker {
    hub: std::sync::Arc<ConnectionHub>,
    correlator: std::sync::Arc<Correlator>,
    tracker: std::sync::Arc<TurnTracker>,
    audit: std::sync::Arc<dyn AuditSink>,
    dedup: ApprovalDedup,
    stall_threshold: Duration,
    notify_hook: std::sync::Arc<dyn NotifyHook>,
}

/// Fallback path when no frontend is connected: an operator-registered
/// webhook-style notifier that can itself eventually deliver a decision
/// (§4.7 step 3). A coordinator with no hook configured always fails closed.
#[async_trait::async_trait]
pub trait NotifyHook: Send + Sync {
    async fn notify(&self, request_id: &str, agent_id: &str, method: &str, params: &Value) -> bool;
    async fn await_decision(&self, request_id: &str, timeout: Duration) -> Option<ApprovalDecision>;
}

/// No-op hook used when the coordinator has nothing registered: every
/// approval without a live connection fails closed (§4.7 step 4).
pub struct NoNotifyHook;

#[async_trait::async_trait]
impl NotifyHook for NoNotifyHook {
    async fn notify(&self, _request_id: &str, _agent_id: &str, _method: &str, _params: &Value) -> bool {
        false
    }

    async fn await_decision(&self, _request_id: &str, _timeout: Duration) -> Option<ApprovalDecision> {
        None
    }
}

const NOTIFY_HOOK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

impl ApprovalBroker {
    pub fn new(
        hub: std::sync::Arc<ConnectionHub>,
        correlator: std::sync::Arc<Correlator>,
        tracker: std::sync::Arc<TurnTracker>,
        audit: std::sync::Arc<dyn AuditSink>,
        stall_threshold: Duration,
        notify_hook: std::sync::Arc<dyn NotifyHook>,
    ) -> Self {
        Self { hub, correlator, tracker, audit, dedup: ApprovalDedup::new(), stall_threshold, notify_hook }
    }

    /// Resolve one approval request from the worker and relay the decision
    /// back to it, always reaching a conclusion (fail-closed on every path
    /// except an explicit client approval).
    pub async fn resolve(
        &self,
        worker: &dyn WorkerHandle,
        agent_id: &str,
        method: &str,
        approval_id: &str,
        params: Value,
    ) -> ApprovalDecision {
        if !self.dedup.begin(agent_id, method, approval_id) {
            warn!(%agent_id, %method, %approval_id, "duplicate approval request rejected");
            self.audit
                .record(
                    AuditEvent::new("approval", method, "rejected_duplicate", agent_id)
                        .with_target(approval_id)
                        .with_detail("concurrent duplicate approval id"),
                )
                .await;
            return ApprovalDecision::Denied;
        }

        let decision = self.resolve_inner(worker, agent_id, method, approval_id, &params).await;
        self.dedup.end(agent_id, method, approval_id);

        let result = match decision {
            ApprovalDecision::Approved => "approved",
            ApprovalDecision::Denied => "denied",
        };
        self.audit
            .record(AuditEvent::new("approval", method, result, agent_id).with_target(approval_id).with_extra(params))
            .await;

        match decision {
            ApprovalDecision::Approved => {
                if let Err(e) = worker.respond(approval_id, Value::Bool(true)).await {
                    warn!(%agent_id, %approval_id, error = %e, "failed to relay approval to worker");
                }
            }
            ApprovalDecision::Denied => {
                if let Err(e) = worker.deny(approval_id, "denied").await {
                    warn!(%agent_id, %approval_id, error = %e, "failed to relay denial to worker");
                }
            }
        }
        decision
    }

    async fn resolve_inner(&self, worker: &dyn WorkerHandle, agent_id: &str, method: &str, approval_id: &str, params: &Value) -> ApprovalDecision {
        let heartbeat = heartbeat_interval(self.stall_threshold);

        if let Some(conn_id) = self.hub.any_connection().await {
            let tracker = self.tracker.clone();
            let agent_for_heartbeat = agent_id.to_owned();
            let heartbeat_task = tokio::spawn(async move {
                crate::panic_guard::guard("approval_heartbeat", async move {
                    loop {
                        tokio::time::sleep(heartbeat).await;
                        tracker.touch_event(&agent_for_heartbeat);
                    }
                })
                .await;
            });

            let primary = self
                .correlator
                .send_and_wait(&self.hub, conn_id, method, Some(params.clone()))
                .await;
            heartbeat_task.abort();

            if let Ok(reply) = primary {
                return decode_decision(&reply);
            }
        }

        // Fallback: an operator-registered notify hook, if any.
        let request_id = approval_id.to_owned();
        if self.notify_hook.notify(&request_id, agent_id, method, params).await {
            let tracker = self.tracker.clone();
            let agent_for_heartbeat = agent_id.to_owned();
            let heartbeat_task = tokio::spawn(async move {
                crate::panic_guard::guard("approval_heartbeat", async move {
                    loop {
                        tokio::time::sleep(heartbeat).await;
                        tracker.touch_event(&agent_for_heartbeat);
                    }
                })
                .await;
            });
            let decision = self.notify_hook.await_decision(&request_id, NOTIFY_HOOK_TIMEOUT).await;
            heartbeat_task.abort();
            if let Some(decision) = decision {
                return decision;
            }
        }

        // No frontend, no hook, timeout, or malformed reply: fail closed.
        let _ = worker; // kept for symmetry with the relay call in `resolve`
        ApprovalDecision::Denied
    }
}

fn decode_decision(reply: &Value) -> ApprovalDecision {
    let approved = reply
        .get("approved")
        .or_else(|| reply.get("decision"))
        .and_then(|v| v.as_bool().or_else(|| v.as_str().map(|s| s.eq_ignore_ascii_case("approve") || s.eq_ignore_ascii_case("approved"))))
        .unwrap_or(false);
    if approved {
        ApprovalDecision::Approved
    } else {
        ApprovalDecision::Denied
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
#[allow(clippy::expect_used)]
mod tests;

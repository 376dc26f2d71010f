// SPDX-License-Identifier: BUSL-1.1

//! Turn Tracker (C6) — the centerpiece. Per-agent turn state machine with
//! watchdog timeout, two-phase stall detection, interrupt handling, and the
//! turn-summary cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::turn::summary_cache::TurnSummaryCache;
use crate::worker::WorkerSupervisor;

/// Grace window between the first stall warning and the auto-interrupt
/// (§4.6: "arm 30 s final timer").
const STALL_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// How often the stall monitor re-checks silence during phase 1.
fn stall_poll_interval(phase1_interval: Duration) -> Duration {
    phase1_interval.min(Duration::from_secs(1))
}

fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallAlertKind {
    Warning,
    AutoInterrupted,
}

#[derive(Debug, Clone)]
pub struct StallAlert {
    pub agent_id: String,
    pub turn_id: String,
    pub kind: StallAlertKind,
    pub grace_remaining: Duration,
}

#[derive(Debug, Clone)]
pub struct TurnCompletion {
    pub agent_id: String,
    pub turn_id: String,
    pub status: String,
    pub reason: String,
    pub synthetic: bool,
    pub summary: Option<String>,
    /// Notification method this completion should go out under —
    /// `turn/aborted` for worker-initiated aborts, `turn/completed`
    /// otherwise (§6 lists both "at minimum").
    pub notification_method: String,
    /// The normalized in-flight event payload this completion rode in on.
    /// `Some` only for non-synthetic, event-driven completions — the
    /// completion contract (§4.6) merges completion fields into this rather
    /// than discarding it; synthetic completions publish the narrow shape
    /// standalone and carry no event payload.
    pub event_payload: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum TrackerEvent {
    Completion(TurnCompletion),
    StallAlert(StallAlert),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptMode {
    InterruptConfirmed,
    InterruptTerminalCompleted,
    InterruptTerminalFailed,
    InterruptTimeout,
    NoActiveTurn,
}

/// Terminal-event classification result (§4.6).
#[derive(Debug, Clone)]
pub struct TerminalClassification {
    pub status: String,
    pub reason: String,
    /// True when the raw event itself carries no natural `turn/completed`
    /// shape and the tracker must publish a standalone notification.
    pub synthetic: bool,
    /// Notification method the completion should be published under.
    pub notification: &'static str,
}

/// Classify a worker event against the terminal-event table in §4.6.
/// Returns `None` for events that do not end the turn.
pub fn classify_terminal_event(event_type: &str, payload: &Value) -> Option<TerminalClassification> {
    let as_str = |v: &Value| v.as_str().map(str::to_owned);
    match event_type {
        "turn_aborted" | "turn/aborted" => Some(TerminalClassification {
            status: "interrupted".to_owned(),
            reason: payload.get("reason").and_then(as_str).unwrap_or_else(|| "turn_aborted".to_owned()),
            synthetic: false,
            notification: "turn/aborted",
        }),
        "turn/completed" | "turn_complete" | "idle" | "codex/event/task_complete" => Some(TerminalClassification {
            status: payload.get("status").and_then(as_str).unwrap_or_else(|| "completed".to_owned()),
            reason: "turn_complete".to_owned(),
            synthetic: false,
            notification: "turn/completed",
        }),
        "stream_error" | "error" | "codex/event/stream_error" => {
            let will_retry = payload
                .get("willRetry")
                .or_else(|| payload.get("will_retry"))
                .or_else(|| payload.get("recoverable"))
                .and_then(Value::as_bool);
            match will_retry {
                Some(false) => Some(TerminalClassification {
                    status: "failed".to_owned(),
                    reason: "stream_error".to_owned(),
                    synthetic: true,
                    notification: "turn/completed",
                }),
                // Some(true) or absent: the worker will retry on its own.
                _ => None,
            }
        }
        "thread/status/changed" => {
            let status_type = payload.get("status").and_then(as_str).unwrap_or_default();
            match status_type.as_str() {
                "idle" => Some(TerminalClassification {
                    status: "completed".to_owned(),
                    reason: "thread_status_idle".to_owned(),
                    synthetic: false,
                    notification: "turn/completed",
                }),
                "systemerror" | "error" | "notloaded" => Some(TerminalClassification {
                    status: "failed".to_owned(),
                    reason: format!("thread_status_{status_type}"),
                    synthetic: false,
                    notification: "turn/completed",
                }),
                _ => None,
            }
        }
        _ => None,
    }
}

fn extract_last_agent_message(payload: &Value) -> Option<String> {
    ["lastAgentMessage"].iter().find_map(|key| payload.get(*key)).and_then(Value::as_str).map(str::to_owned).or_else(|| {
        ["turn", "msg"].iter().find_map(|nest| {
            payload.get(*nest).and_then(|v| v.get("lastAgentMessage")).and_then(Value::as_str).map(str::to_owned)
        })
    })
}

struct ActiveTurn {
    turn_id: String,
    generation: u64,
    last_event_at: Instant,
    interrupt_requested: bool,
    interrupt_requested_at: Option<Instant>,
    stall_grace_started: Option<Instant>,
    stall_auto_interrupted: bool,
    done_tx: watch::Sender<Option<String>>,
    cancel: CancellationToken,
}

pub struct TurnTracker {
    active: Mutex<HashMap<String, ActiveTurn>>,
    summary_cache: Mutex<TurnSummaryCache>,
    next_generation: AtomicU64,
    watchdog_timeout: Duration,
    stall_threshold: Duration,
    stall_timer_interval: Duration,
    events_tx: tokio::sync::mpsc::UnboundedSender<TrackerEvent>,
}

impl TurnTracker {
    pub fn new(
        watchdog_timeout: Duration,
        stall_threshold: Duration,
        stall_timer_interval: Duration,
        summary_cache_cap: usize,
        summary_cache_ttl: Duration,
    ) -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<TrackerEvent>) {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let tracker = Arc::new(Self {
            active: Mutex::new(HashMap::new()),
            summary_cache: Mutex::new(TurnSummaryCache::new(summary_cache_cap, summary_cache_ttl)),
            next_generation: AtomicU64::new(1),
            watchdog_timeout,
            stall_threshold,
            stall_timer_interval,
            events_tx,
        });
        (tracker, events_rx)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveTurn>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_active(&self, agent_id: &str) -> bool {
        self.lock_active().contains_key(agent_id)
    }

    pub fn done_receiver(&self, agent_id: &str) -> Option<watch::Receiver<Option<String>>> {
        self.lock_active().get(agent_id).map(|t| t.done_tx.subscribe())
    }

    /// Begin a tracked turn for `agent_id`. If one is already active, it is
    /// superseded first (§4.6 `active | begin(agent, new)`).
    pub async fn begin(
        self: &Arc<Self>,
        workers: Arc<WorkerSupervisor>,
        agent_id: &str,
        source_turn_id: Option<String>,
    ) -> String {
        let superseded = self.lock_active().remove(agent_id);
        if let Some(prior) = superseded {
            prior.cancel.cancel();
            self.publish_completion(TurnCompletion {
                agent_id: agent_id.to_owned(),
                turn_id: prior.turn_id,
                status: "failed".to_owned(),
                reason: "superseded_by_new_turn".to_owned(),
                synthetic: true,
                summary: None,
                notification_method: "turn/completed".to_owned(),
                event_payload: None,
            });
        }

        let turn_id = source_turn_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("turn-{}", now_millis()));
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (done_tx, _done_rx) = watch::channel(None);

        self.lock_active().insert(
            agent_id.to_owned(),
            ActiveTurn {
                turn_id: turn_id.clone(),
                generation,
                last_event_at: Instant::now(),
                interrupt_requested: false,
                interrupt_requested_at: None,
                stall_grace_started: None,
                stall_auto_interrupted: false,
                done_tx,
                cancel: cancel.clone(),
            },
        );

        tokio::spawn(Self::watchdog_task(
            self.clone(),
            agent_id.to_owned(),
            turn_id.clone(),
            generation,
            cancel.clone(),
            self.watchdog_timeout,
        ));
        tokio::spawn(Self::stall_task(
            self.clone(),
            workers,
            agent_id.to_owned(),
            turn_id.clone(),
            generation,
            cancel,
        ));

        turn_id
    }

    pub fn mark_interrupt(&self, agent_id: &str) -> bool {
        let mut map = self.lock_active();
        match map.get_mut(agent_id) {
            Some(turn) => {
                turn.interrupt_requested = true;
                turn.interrupt_requested_at = Some(Instant::now());
                true
            }
            None => false,
        }
    }

    pub fn interrupt_requested(&self, agent_id: &str) -> bool {
        self.lock_active().get(agent_id).is_some_and(|t| t.interrupt_requested)
    }

    /// Advance `last-event-at` and clear any in-progress stall grace.
    pub fn touch_event(&self, agent_id: &str) {
        if let Some(turn) = self.lock_active().get_mut(agent_id) {
            turn.last_event_at = Instant::now();
            turn.stall_grace_started = None;
        }
    }

    fn resolve_summary(&self, agent_id: &str, turn_id: &str, raw_payload: &Value) -> Option<String> {
        let mut cache = self.summary_cache.lock().unwrap_or_else(|p| p.into_inner());
        match extract_last_agent_message(raw_payload) {
            Some(text) => {
                cache.put(agent_id, turn_id, text.clone());
                Some(text)
            }
            None => cache.get(agent_id, Some(turn_id)).or_else(|| cache.get(agent_id, None)),
        }
    }

    fn publish_completion(&self, completion: TurnCompletion) {
        let _ = self.events_tx.send(TrackerEvent::Completion(completion));
    }

    fn publish_alert(&self, alert: StallAlert) {
        let _ = self.events_tx.send(TrackerEvent::StallAlert(alert));
    }

    /// Complete an active turn unconditionally, regardless of which turn-id
    /// is currently tracked (`turn/forceComplete`, and the internal
    /// stall/watchdog paths).
    pub async fn force_complete(&self, agent_id: &str, status: &str, reason: &str, synthetic: bool) -> Option<TurnCompletion> {
        let removed = self.lock_active().remove(agent_id)?;
        removed.cancel.cancel();
        let summary = self.resolve_summary(agent_id, &removed.turn_id, &Value::Null);
        let completion = TurnCompletion {
            agent_id: agent_id.to_owned(),
            turn_id: removed.turn_id,
            status: status.to_owned(),
            reason: reason.to_owned(),
            synthetic,
            summary,
            notification_method: "turn/completed".to_owned(),
            event_payload: None,
        };
        let _ = removed.done_tx.send(Some(completion.status.clone()));
        self.publish_completion(completion.clone());
        Some(completion)
    }

    /// Complete the active turn in response to a real worker event,
    /// applying the interrupt-coercion and summary-injection rules (§4.6).
    /// Logs (but does not refuse on) a turn-id mismatch — completion always
    /// proceeds so the tracker never gets stuck.
    pub fn complete_from_event(
        &self,
        agent_id: &str,
        turn_id_hint: Option<&str>,
        classification: TerminalClassification,
        raw_payload: &Value,
    ) -> Option<TurnCompletion> {
        let removed = self.lock_active().remove(agent_id)?;
        removed.cancel.cancel();

        if let Some(hint) = turn_id_hint {
            if hint != removed.turn_id {
                info!(%agent_id, active_turn_id = %removed.turn_id, completed_turn_id = hint, "completing with mismatched turn id");
            }
        }

        let mut status = classification.status;
        if removed.interrupt_requested && status == "completed" {
            status = "interrupted".to_owned();
        }

        let summary = self.resolve_summary(agent_id, &removed.turn_id, raw_payload);
        let event_payload = (!classification.synthetic).then(|| raw_payload.clone());
        let completion = TurnCompletion {
            agent_id: agent_id.to_owned(),
            turn_id: removed.turn_id,
            status,
            reason: classification.reason,
            synthetic: classification.synthetic,
            summary,
            notification_method: classification.notification.to_owned(),
            event_payload,
        };
        let _ = removed.done_tx.send(Some(completion.status.clone()));
        self.publish_completion(completion.clone());
        Some(completion)
    }

    async fn watchdog_task(
        tracker: Arc<Self>,
        agent_id: String,
        turn_id: String,
        generation: u64,
        cancel: CancellationToken,
        timeout: Duration,
    ) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(timeout) => {}
        }
        let matches = {
            let map = tracker.lock_active();
            map.get(&agent_id).is_some_and(|t| t.turn_id == turn_id && t.generation == generation)
        };
        if matches {
            warn!(%agent_id, %turn_id, "turn watchdog fired");
            tracker.force_complete(&agent_id, "failed", "watchdog_timeout", true).await;
        }
    }

    async fn stall_task(
        tracker: Arc<Self>,
        workers: Arc<WorkerSupervisor>,
        agent_id: String,
        turn_id: String,
        generation: u64,
        cancel: CancellationToken,
    ) {
        let poll = stall_poll_interval(tracker.stall_timer_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(poll) => {}
            }

            enum Action {
                Continue,
                Warn(Duration),
                AutoInterrupt,
                Gone,
            }

            let action = {
                let mut map = tracker.lock_active();
                let Some(turn) = map.get_mut(&agent_id) else { break };
                if turn.turn_id != turn_id || turn.generation != generation {
                    Action::Gone
                } else {
                    match turn.stall_grace_started {
                        None => {
                            if turn.last_event_at.elapsed() >= tracker.stall_threshold {
                                turn.stall_grace_started = Some(Instant::now());
                                Action::Warn(STALL_GRACE_PERIOD)
                            } else {
                                Action::Continue
                            }
                        }
                        Some(started) => {
                            if started.elapsed() >= STALL_GRACE_PERIOD {
                                turn.stall_auto_interrupted = true;
                                Action::AutoInterrupt
                            } else {
                                Action::Continue
                            }
                        }
                    }
                }
            };

            match action {
                Action::Continue => continue,
                Action::Gone => break,
                Action::Warn(grace_remaining) => {
                    warn!(%agent_id, %turn_id, "turn stall detected, entering grace period");
                    tracker.publish_alert(StallAlert {
                        agent_id: agent_id.clone(),
                        turn_id: turn_id.clone(),
                        kind: StallAlertKind::Warning,
                        grace_remaining,
                    });
                    continue;
                }
                Action::AutoInterrupt => {
                    warn!(%agent_id, %turn_id, "turn stall grace expired, auto-interrupting");
                    tracker.publish_alert(StallAlert {
                        agent_id: agent_id.clone(),
                        turn_id: turn_id.clone(),
                        kind: StallAlertKind::AutoInterrupted,
                        grace_remaining: Duration::ZERO,
                    });
                    let sent = match workers.get(&agent_id).await {
                        Some(handle) => handle.interrupt().await.is_ok(),
                        None => false,
                    };
                    if !sent {
                        tracker.force_complete(&agent_id, "failed", "thinking_stall_timeout", true).await;
                    }
                    break;
                }
            }
        }
    }

    /// Synthesize a `turn/completed` notification when no turn is actually
    /// tracked for `agent_id`. Used by the interrupt flow when the worker
    /// supervisor believes a session is still live but the tracker has
    /// nothing recorded for it (§4.6 step 2, `interrupt_no_active_turn`).
    pub fn publish_synthetic_completion(&self, agent_id: &str, turn_id: Option<String>, status: &str, reason: &str) {
        let turn_id = turn_id.unwrap_or_else(|| format!("turn-{}", now_millis()));
        let summary = self.resolve_summary(agent_id, &turn_id, &Value::Null);
        self.publish_completion(TurnCompletion {
            agent_id: agent_id.to_owned(),
            turn_id,
            status: status.to_owned(),
            reason: reason.to_owned(),
            synthetic: true,
            summary,
            notification_method: "turn/completed".to_owned(),
            event_payload: None,
        });
    }

    /// Wait up to `timeout` for the active turn to reach a terminal state,
    /// preferring the done-channel; used by the interrupt flow (§4.6 step 3).
    pub async fn wait_for_completion(&self, agent_id: &str, timeout: Duration) -> Option<String> {
        let mut rx = self.done_receiver(agent_id)?;
        if let Some(status) = rx.borrow().clone() {
            return Some(status);
        }
        match tokio::time::timeout(timeout, rx.changed()).await {
            Ok(Ok(())) => rx.borrow().clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
#[allow(clippy::expect_used, clippy::panic)]
mod tests;

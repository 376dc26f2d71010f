// SPDX-License-Identifier: BUSL-1.1

//! UI-State Throttle (C9): a single global leading+trailing window coalesces
//! high-frequency `ui/state/changed` pings (§4.9).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;

struct ThrottleState {
    last_emit_at: Option<Instant>,
    pending: Option<Value>,
    trailing_armed: bool,
}

pub struct UiStateThrottle {
    window: Duration,
    state: Mutex<ThrottleState>,
    emit_tx: mpsc::UnboundedSender<Value>,
}

impl UiStateThrottle {
    pub fn new(window: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let (emit_tx, emit_rx) = mpsc::unbounded_channel();
        let throttle = Arc::new(Self {
            window,
            state: Mutex::new(ThrottleState { last_emit_at: None, pending: None, trailing_armed: false }),
            emit_tx,
        });
        (throttle, emit_rx)
    }

    /// Whether `method`/`params` should additionally trigger `ui/state/changed`
    /// (§4.9): yes for `workspace/run/*`, and for anything carrying a
    /// non-empty `threadId` or `agent_id`; never for `ui/state/changed` itself.
    pub fn should_trigger(method: &str, params: &Value) -> bool {
        if method == "ui/state/changed" {
            return false;
        }
        if method.starts_with("workspace/run/") {
            return true;
        }
        let non_empty_str = |key: &str| params.get(key).and_then(Value::as_str).is_some_and(|s| !s.is_empty());
        non_empty_str("threadId") || non_empty_str("agent_id")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Feed a new `ui/state/changed` payload through the throttle.
    pub fn notify(self: &Arc<Self>, payload: Value) {
        let now = Instant::now();
        let mut arm_trailing_in = None;
        {
            let mut state = self.lock();
            let within_window = state.last_emit_at.is_some_and(|last| now.duration_since(last) < self.window);
            if within_window {
                state.pending = Some(payload);
                if !state.trailing_armed {
                    state.trailing_armed = true;
                    let elapsed = now.duration_since(state.last_emit_at.unwrap_or(now));
                    arm_trailing_in = Some(self.window.saturating_sub(elapsed));
                }
            } else {
                state.last_emit_at = Some(now);
                state.pending = None;
                state.trailing_armed = false;
                let _ = self.emit_tx.send(payload);
            }
        }
        if let Some(delay) = arm_trailing_in {
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                this.fire_trailing();
            });
        }
    }

    fn fire_trailing(self: &Arc<Self>) {
        let mut state = self.lock();
        state.trailing_armed = false;
        if let Some(payload) = state.pending.take() {
            state.last_emit_at = Some(Instant::now());
            let _ = self.emit_tx.send(payload);
        }
    }
}

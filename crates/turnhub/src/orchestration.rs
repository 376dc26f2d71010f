// SPDX-License-Identifier: BUSL-1.1

//! Orchestration pending-reports (§3 `OrchestrationPendingReports`):
//! worker-agent-id → set of requesters waiting on that worker's next
//! terminal event. When the worker finishes, the set drains and each
//! requester gets an auto-synthesized completion report.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Default)]
pub struct OrchestrationPendingReports {
    entries: Mutex<HashMap<String, HashMap<String, Instant>>>,
    ttl: Duration,
}

impl OrchestrationPendingReports {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl: DEFAULT_TTL }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<String, Instant>>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register `requester_agent_id` as waiting on `worker_agent_id`'s next
    /// terminal event. Re-registering refreshes the timestamp.
    pub fn register(&self, worker_agent_id: &str, requester_agent_id: &str) {
        self.lock()
            .entry(worker_agent_id.to_owned())
            .or_default()
            .insert(requester_agent_id.to_owned(), Instant::now());
    }

    /// Drain and return the still-live requesters for `worker_agent_id`,
    /// applying the TTL and clearing the set.
    pub fn drain(&self, worker_agent_id: &str) -> Vec<String> {
        let ttl = self.ttl;
        match self.lock().remove(worker_agent_id) {
            Some(requesters) => requesters
                .into_iter()
                .filter(|(_, registered_at)| registered_at.elapsed() < ttl)
                .map(|(requester, _)| requester)
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_registered_requesters() {
        let reports = OrchestrationPendingReports::new();
        reports.register("worker-1", "requester-a");
        reports.register("worker-1", "requester-b");
        let mut drained = reports.drain("worker-1");
        drained.sort();
        assert_eq!(drained, vec!["requester-a".to_owned(), "requester-b".to_owned()]);
        assert!(reports.drain("worker-1").is_empty());
    }

    #[test]
    fn expired_registrations_are_not_drained() {
        let reports = OrchestrationPendingReports::with_ttl(Duration::from_millis(1));
        reports.register("worker-1", "requester-a");
        std::thread::sleep(Duration::from_millis(5));
        assert!(reports.drain("worker-1").is_empty());
    }
}

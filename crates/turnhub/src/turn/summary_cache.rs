// SPDX-License-Identifier: BUSL-1.1

//! Turn summary cache (§3 `TurnSummaryCache`): remembers the last assistant
//! message per agent so it can be injected into a `turn/completed` even when
//! the terminal event itself doesn't carry one.

use std::time::{Duration, Instant};

use indexmap::IndexMap;

struct CacheEntry {
    turn_id: String,
    summary: String,
    updated_at: Instant,
}

pub struct TurnSummaryCache {
    entries: IndexMap<String, CacheEntry>,
    cap: usize,
    ttl: Duration,
}

impl TurnSummaryCache {
    pub fn new(cap: usize, ttl: Duration) -> Self {
        Self { entries: IndexMap::new(), cap, ttl }
    }

    pub fn put(&mut self, agent_id: &str, turn_id: &str, summary: String) {
        self.entries.shift_remove(agent_id);
        self.entries.insert(agent_id.to_owned(), CacheEntry { turn_id: turn_id.to_owned(), summary, updated_at: Instant::now() });
        self.evict();
    }

    /// Look up a summary for `agent_id`, optionally pinned to a specific
    /// `turn_id`. Expired entries are evicted lazily on read.
    pub fn get(&mut self, agent_id: &str, turn_id: Option<&str>) -> Option<String> {
        let expired = self.entries.get(agent_id).is_some_and(|e| e.updated_at.elapsed() > self.ttl);
        if expired {
            self.entries.shift_remove(agent_id);
            return None;
        }
        self.entries.get(agent_id).filter(|e| match turn_id {
            Some(t) => t == e.turn_id,
            None => true,
        }).map(|e| e.summary.clone())
    }

    fn evict(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.updated_at.elapsed() <= ttl);
        while self.entries.len() > self.cap {
            self.entries.shift_remove_index(0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let mut cache = TurnSummaryCache::new(512, Duration::from_secs(1800));
        cache.put("agent-1", "turn-1", "hello".to_owned());
        assert_eq!(cache.get("agent-1", None), Some("hello".to_owned()));
        assert_eq!(cache.get("agent-1", Some("turn-1")), Some("hello".to_owned()));
        assert_eq!(cache.get("agent-1", Some("turn-2")), None);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut cache = TurnSummaryCache::new(2, Duration::from_secs(1800));
        cache.put("agent-1", "t1", "a".to_owned());
        cache.put("agent-2", "t1", "b".to_owned());
        cache.put("agent-3", "t1", "c".to_owned());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("agent-1", None), None);
        assert_eq!(cache.get("agent-3", None), Some("c".to_owned()));
    }

    #[test]
    fn ttl_expires_entries() {
        let mut cache = TurnSummaryCache::new(512, Duration::from_millis(1));
        cache.put("agent-1", "t1", "a".to_owned());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("agent-1", None), None);
    }
}

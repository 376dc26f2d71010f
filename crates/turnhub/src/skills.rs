// SPDX-License-Identifier: BUSL-1.1

//! Agent skill configuration (§3 `AgentSkillConfig`): agent-id → ordered
//! unique (case-folded de-dup) list of skill names.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

#[derive(Default)]
pub struct AgentSkillConfig {
    skills: RwLock<HashMap<String, Vec<String>>>,
}

impl AgentSkillConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, agent_id: &str, requested: Vec<String>) {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for skill in requested {
            let key = skill.to_lowercase();
            if seen.insert(key) {
                ordered.push(skill);
            }
        }
        self.skills.write().await.insert(agent_id.to_owned(), ordered);
    }

    pub async fn get(&self, agent_id: &str) -> Vec<String> {
        self.skills.read().await.get(agent_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedupes_case_insensitively_preserving_first_occurrence_casing() {
        let config = AgentSkillConfig::new();
        config.set("agent-1", vec!["Rust".to_owned(), "rust".to_owned(), "Go".to_owned()]).await;
        assert_eq!(config.get("agent-1").await, vec!["Rust".to_owned(), "Go".to_owned()]);
    }

    #[tokio::test]
    async fn unknown_agent_returns_empty() {
        let config = AgentSkillConfig::new();
        assert!(config.get("nobody").await.is_empty());
    }
}

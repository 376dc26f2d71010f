// SPDX-License-Identifier: BUSL-1.1

//! Agent/codex binding store (A3, ambient): `(agent_id, codex_thread_id)`
//! row consulted on resume (§6 "Persisted state layout"). Durable storage is
//! out of scope; this crate depends only on [`BindingStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct Binding {
    pub agent_id: String,
    pub codex_thread_id: String,
    pub session_lost: bool,
}

#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn get(&self, agent_id: &str) -> Option<Binding>;
    async fn put(&self, binding: Binding);
    async fn mark_session_lost(&self, agent_id: &str);
}

#[derive(Default)]
pub struct MemoryBindingStore {
    rows: RwLock<HashMap<String, Binding>>,
}

impl MemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BindingStore for MemoryBindingStore {
    async fn get(&self, agent_id: &str) -> Option<Binding> {
        self.rows.read().await.get(agent_id).cloned()
    }

    async fn put(&self, binding: Binding) {
        self.rows.write().await.insert(binding.agent_id.clone(), binding);
    }

    async fn mark_session_lost(&self, agent_id: &str) {
        if let Some(row) = self.rows.write().await.get_mut(agent_id) {
            row.session_lost = true;
        }
    }
}

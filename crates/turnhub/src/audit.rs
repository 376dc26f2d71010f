// SPDX-License-Identifier: BUSL-1.1

//! Audit trail (A3, ambient): append-only record contract from §6. The real
//! sink (a durable audit log) is out of scope; this crate depends only on
//! the [`AuditSink`] trait so Approval Broker writes have a concrete,
//! testable destination.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

/// Per-field truncation cap (§6 "truncation caps per field").
const FIELD_CAP: usize = 2000;

fn truncate(value: String) -> String {
    if value.len() <= FIELD_CAP {
        value
    } else {
        let mut truncated: String = value.chars().take(FIELD_CAP).collect();
        truncated.push_str("...[truncated]");
        truncated
    }
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_type: String,
    pub action: String,
    pub result: String,
    pub actor: String,
    pub target: String,
    pub detail: String,
    pub level: String,
    pub extra: Value,
}

impl AuditEvent {
    pub fn new(event_type: impl Into<String>, action: impl Into<String>, result: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            action: action.into(),
            result: result.into(),
            actor: actor.into(),
            target: String::new(),
            detail: String::new(),
            level: "info".to_owned(),
            extra: Value::Null,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = truncate(target.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = truncate(detail.into());
        self
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Default in-memory sink used by tests and when no external sink is wired.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        info!(event_type = %event.event_type, action = %event.action, result = %event.result, actor = %event.actor, "audit event");
        self.events.lock().await.push(event);
    }
}

// SPDX-License-Identifier: BUSL-1.1

//! Worker capability set (§9 "Interface abstraction over subprocess"): any
//! transport satisfying these operations is a valid worker handle.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::CoordinatorError;

/// One event emitted by a worker, tagged with the agent it came from.
#[derive(Debug, Clone)]
pub struct WorkerEvent {
    pub agent_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub images: Vec<String>,
    pub files: Vec<String>,
    pub output_schema: Option<Value>,
}

#[async_trait]
pub trait WorkerHandle: Send + Sync {
    async fn submit(&self, input: Vec<Value>, opts: SubmitOptions) -> Result<(), CoordinatorError>;
    async fn send_command(&self, command: &str, args: Value) -> Result<(), CoordinatorError>;
    async fn resume_thread(&self, thread_id: &str, cwd: Option<&str>) -> Result<(), CoordinatorError>;
    async fn respond(&self, call_id: &str, payload: Value) -> Result<(), CoordinatorError>;
    async fn deny(&self, call_id: &str, reason: &str) -> Result<(), CoordinatorError>;
    async fn interrupt(&self) -> Result<(), CoordinatorError>;
    async fn stop(&self);

    fn port(&self) -> Option<u16>;
    fn thread_id(&self) -> Option<String>;
    fn event_subscribe(&self) -> broadcast::Receiver<WorkerEvent>;
}

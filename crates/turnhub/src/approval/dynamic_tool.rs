// SPDX-License-Identifier: BUSL-1.1

//! Approval & Dynamic-Tool Broker (C7), dynamic-tool half: the worker can
//! invoke tools the coordinator itself implements (code execution,
//! cross-agent messaging) rather than ones backed by the frontend (§4.7).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::connection::ConnectionHub;
use crate::orchestration::OrchestrationPendingReports;

const PREVIEW_CAP: usize = 500;
const NESTING_KEYS: &[&str] = &["msg", "data", "payload"];

#[derive(Debug, Clone)]
pub struct DynamicToolCall {
    pub tool: String,
    pub call_id: String,
    pub arguments: Value,
}

/// Parse a worker event payload into a dynamic-tool invocation, checking the
/// same `msg`/`data`/`payload` nesting the event normalizer tolerates.
pub fn parse_dynamic_tool_call(payload: &Value) -> Option<DynamicToolCall> {
    let candidates = std::iter::once(payload).chain(NESTING_KEYS.iter().filter_map(|k| payload.get(*k)));
    for candidate in candidates {
        let tool = candidate.get("tool").and_then(Value::as_str);
        let call_id = candidate.get("callId").or_else(|| candidate.get("call_id")).and_then(Value::as_str);
        if let (Some(tool), Some(call_id)) = (tool, call_id) {
            return Some(DynamicToolCall {
                tool: tool.to_owned(),
                call_id: call_id.to_owned(),
                arguments: candidate.get("arguments").cloned().unwrap_or(Value::Null),
            });
        }
    }
    None
}

/// A best-effort file-path hint for display/audit purposes; not load-bearing
/// for execution.
pub fn extract_file_hint(arguments: &Value) -> Option<String> {
    ["file_path", "path", "file"].iter().find_map(|key| arguments.get(*key).and_then(Value::as_str).map(str::to_owned))
}

/// §4.7 "a result counts as successful unless it looks like a tool-side
/// failure": no leading error/failed/unknown-tool wording, and no embedded
/// `"error":` object key.
pub fn looks_successful(result_text: &str) -> bool {
    let lower = result_text.trim_start().to_lowercase();
    if lower.starts_with("error") || lower.starts_with("failed") || lower.starts_with("unknown tool") {
        return false;
    }
    !lower.contains("\"error\":")
}

fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CAP {
        text.to_owned()
    } else {
        let mut preview: String = text.chars().take(PREVIEW_CAP).collect();
        preview.push_str("...");
        preview
    }
}

#[derive(Debug, Clone)]
pub struct DynamicToolResult {
    pub call_id: String,
    pub tool: String,
    pub text: String,
    pub success: bool,
}

/// Dispatches dynamic-tool calls the coordinator answers directly:
/// `code_run`/`code_run_test` (cancellable, tracked per `(agent_id, call_id)`)
/// and `orchestration_send_message` (registers the sender as waiting on the
/// target agent's next terminal event, via [`OrchestrationPendingReports`]).
/// Anything else is rejected with an "unknown tool" result.
pub struct DynamicToolDispatcher {
    hub: std::sync::Arc<ConnectionHub>,
    orchestration: std::sync::Arc<OrchestrationPendingReports>,
    call_counts: Mutex<HashMap<String, u64>>,
    running: Mutex<HashMap<(String, String), CancellationToken>>,
}

impl DynamicToolDispatcher {
    pub fn new(hub: std::sync::Arc<ConnectionHub>, orchestration: std::sync::Arc<OrchestrationPendingReports>) -> Self {
        Self { hub, orchestration, call_counts: Mutex::new(HashMap::new()), running: Mutex::new(HashMap::new()) }
    }

    fn bump_count(&self, tool: &str) -> u64 {
        let mut counts = self.call_counts.lock().unwrap_or_else(|p| p.into_inner());
        let entry = counts.entry(tool.to_owned()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Cancel an in-flight `code_run`/`code_run_test` invocation, if any is
    /// still tracked for `(agent_id, call_id)`.
    pub fn cancel(&self, agent_id: &str, call_id: &str) -> bool {
        let running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        match running.get(&(agent_id.to_owned(), call_id.to_owned())) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one dynamic-tool call to completion, broadcasting the
    /// `dynamic-tool/called` notification with a truncated preview.
    pub async fn dispatch(&self, agent_id: &str, call: DynamicToolCall) -> DynamicToolResult {
        let count = self.bump_count(&call.tool);
        info!(%agent_id, tool = %call.tool, call_id = %call.call_id, count, "dynamic tool invoked");

        let started = Instant::now();
        let result = match call.tool.as_str() {
            "code_run" | "code_run_test" => self.run_code(agent_id, &call).await,
            "orchestration_send_message" => self.send_orchestration_message(agent_id, &call),
            other => DynamicToolResult {
                call_id: call.call_id.clone(),
                tool: other.to_owned(),
                text: format!("unknown tool: {other}"),
                success: false,
            },
        };
        let elapsed = started.elapsed();

        self.broadcast_called(agent_id, &call, &result, elapsed).await;
        result
    }

    async fn run_code(&self, agent_id: &str, call: &DynamicToolCall) -> DynamicToolResult {
        let key = (agent_id.to_owned(), call.call_id.clone());
        let token = CancellationToken::new();
        self.running.lock().unwrap_or_else(|p| p.into_inner()).insert(key.clone(), token.clone());

        let command = call.arguments.get("command").and_then(Value::as_str).unwrap_or_default().to_owned();
        let text = tokio::select! {
            _ = token.cancelled() => "cancelled".to_owned(),
            output = run_shell(&command) => output,
        };

        self.running.lock().unwrap_or_else(|p| p.into_inner()).remove(&key);
        let success = looks_successful(&text);
        DynamicToolResult { call_id: call.call_id.clone(), tool: call.tool.clone(), text, success }
    }

    fn send_orchestration_message(&self, agent_id: &str, call: &DynamicToolCall) -> DynamicToolResult {
        let target = call.arguments.get("target_agent_id").or_else(|| call.arguments.get("agent_id")).and_then(Value::as_str);
        match target {
            Some(target) => {
                self.orchestration.register(target, agent_id);
                DynamicToolResult {
                    call_id: call.call_id.clone(),
                    tool: call.tool.clone(),
                    text: format!("registered to receive {target}'s next completion report"),
                    success: true,
                }
            }
            None => DynamicToolResult {
                call_id: call.call_id.clone(),
                tool: call.tool.clone(),
                text: "error: missing target_agent_id".to_owned(),
                success: false,
            },
        }
    }

    async fn broadcast_called(
        &self,
        agent_id: &str,
        call: &DynamicToolCall,
        result: &DynamicToolResult,
        elapsed: std::time::Duration,
    ) {
        let file_hint = extract_file_hint(&call.arguments);
        let notification = crate::rpc::envelope::RpcNotification::new(
            "dynamic-tool/called",
            serde_json::json!({
                "agent_id": agent_id,
                "tool": call.tool,
                "callId": call.call_id,
                "arguments": call.arguments,
                "elapsedMs": elapsed.as_millis(),
                "success": result.success,
                "preview": truncate_preview(&result.text),
                "file": file_hint,
            }),
        );
        if let Ok(bytes) = serde_json::to_vec(&notification) {
            self.hub.broadcast(bytes).await;
        }
    }
}

async fn run_shell(command: &str) -> String {
    if command.trim().is_empty() {
        return "error: empty command".to_owned();
    }
    match tokio::process::Command::new("sh").arg("-c").arg(command).output().await {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.status.success() {
                text.push_str("\nerror: exited with ");
                text.push_str(&output.status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_owned()));
            }
            text
        }
        Err(e) => format!("error: failed to spawn shell: {e}"),
    }
}

#[cfg(test)]
#[path = "dynamic_tool_tests.rs"]
#[allow(clippy::expect_used)]
mod tests;

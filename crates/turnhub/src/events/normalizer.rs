// SPDX-License-Identifier: BUSL-1.1

//! Event Normalizer (C5): translate worker-emitted events into UI-shaped
//! notifications. `uiType` is a small closed enum (§9 "Tagged-variant
//! events") so downstream UI code switches rather than duck-types.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields copied verbatim from the raw event (and from its `msg`/`data`/
/// `payload` nesting) onto the normalized payload, outer occurrence wins.
const ALLOWLIST: &[&str] = &[
    "text",
    "delta",
    "command",
    "exitCode",
    "exit_code",
    "status",
    "file",
    "files",
    "reason",
    "tokenUsage",
    "token_usage",
    "willRetry",
    "will_retry",
    "recoverable",
    "lastAgentMessage",
];

const NESTING_KEYS: &[&str] = &["msg", "data", "payload"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiType {
    MessageDelta,
    Message,
    Command,
    FileChange,
    ApprovalRequest,
    ToolCall,
    Status,
    Error,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub event_type: String,
    pub ui_type: UiType,
    pub ui_text: Option<String>,
    pub ui_command: Option<String>,
    pub ui_files: Option<Vec<String>>,
    pub ui_exit_code: Option<i64>,
    pub payload: Value,
}

/// Transient per-agent file list captured from patch/file-change start or
/// delta events, consumed by the matching completion event (§3).
#[derive(Default)]
pub struct FileChangeMemo {
    entries: HashMap<String, (Vec<String>, Instant)>,
}

const MEMO_TTL: Duration = Duration::from_secs(10 * 60);

impl FileChangeMemo {
    pub fn remember(&mut self, agent_id: &str, files: Vec<String>) {
        self.entries.insert(agent_id.to_owned(), (files, Instant::now()));
    }

    pub fn take(&mut self, agent_id: &str) -> Option<Vec<String>> {
        match self.entries.remove(agent_id) {
            Some((files, at)) if at.elapsed() < MEMO_TTL => Some(files),
            _ => None,
        }
    }

    pub fn peek(&self, agent_id: &str) -> Option<Vec<String>> {
        self.entries.get(agent_id).filter(|(_, at)| at.elapsed() < MEMO_TTL).map(|(f, _)| f.clone())
    }

    pub fn clear(&mut self, agent_id: &str) {
        self.entries.remove(agent_id);
    }
}

fn merge_allowlisted(dst: &mut Map<String, Value>, src: &Map<String, Value>) {
    for key in ALLOWLIST {
        if dst.contains_key(*key) {
            continue;
        }
        if let Some(v) = src.get(*key) {
            dst.insert((*key).to_owned(), v.clone());
        }
    }
}

fn event_type_of(raw: &Value) -> String {
    raw.get("type")
        .or_else(|| raw.get("method"))
        .or_else(|| raw.get("event"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_owned()
}

fn extract_str(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| raw.get(*k)).and_then(Value::as_str).map(str::to_owned)
}

/// Parse `--- a/path` / `+++ b/path` unified-diff headers out of a patch
/// body when no explicit file list was given.
fn parse_diff_headers(text: &str) -> Vec<String> {
    let mut files = Vec::new();
    for line in text.lines() {
        let path = line.strip_prefix("+++ b/").or_else(|| line.strip_prefix("--- a/"));
        if let Some(path) = path {
            if !files.contains(&path.to_owned()) {
                files.push(path.to_owned());
            }
        }
    }
    files
}

fn extract_files(raw: &Value) -> Option<Vec<String>> {
    if let Some(Value::Array(arr)) = raw.get("files") {
        let files: Vec<String> = arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect();
        if !files.is_empty() {
            return Some(files);
        }
    }
    if let Some(file) = raw.get("file").and_then(Value::as_str) {
        return Some(vec![file.to_owned()]);
    }
    for key in ["patch", "diff", "text"] {
        if let Some(text) = raw.get(key).and_then(Value::as_str) {
            let files = parse_diff_headers(text);
            if !files.is_empty() {
                return Some(files);
            }
        }
    }
    None
}

fn is_file_change_start(event_type: &str) -> bool {
    matches!(event_type, "patch_delta" | "file_change_delta" | "file_change_start" | "patch_start")
}

fn is_file_change_completion(event_type: &str) -> bool {
    matches!(event_type, "patch_complete" | "file_change_complete" | "patch_apply_end")
}

fn is_error_event(event_type: &str) -> bool {
    matches!(event_type, "stream_error" | "error" | "codex/event/stream_error")
}

fn is_approval_event(event_type: &str) -> bool {
    matches!(event_type, "exec_approval_request" | "file_change_approval_request")
}

fn is_tool_call_event(event_type: &str) -> bool {
    event_type == "dynamic_tool_call" || event_type.starts_with("tool_call")
}

fn classify_ui_type(event_type: &str) -> UiType {
    match event_type {
        "agent_message_delta" => UiType::MessageDelta,
        "agent_message" | "turn/completed" | "turn_complete" | "idle" | "codex/event/task_complete" => {
            UiType::Message
        }
        "exec_command_begin" | "exec_command_output" | "exec_command_end" => UiType::Command,
        t if is_file_change_start(t) || is_file_change_completion(t) => UiType::FileChange,
        t if is_approval_event(t) => UiType::ApprovalRequest,
        t if is_tool_call_event(t) => UiType::ToolCall,
        "thread/status/changed" => UiType::Status,
        t if is_error_event(t) => UiType::Error,
        _ => UiType::Unknown,
    }
}

/// Normalize one worker event into a UI-shaped payload. `memo` tracks file
/// paths across a file-change start/delta → complete pair for this agent.
pub fn normalize(agent_id: &str, raw: &Value, memo: &mut FileChangeMemo) -> NormalizedEvent {
    let event_type = event_type_of(raw);
    let mut payload = Map::new();
    payload.insert("agentId".to_owned(), Value::String(agent_id.to_owned()));

    if let Some(obj) = raw.as_object() {
        merge_allowlisted(&mut payload, obj);
        for nested_key in NESTING_KEYS {
            if let Some(Value::Object(nested)) = obj.get(*nested_key) {
                merge_allowlisted(&mut payload, nested);
            }
        }
    }

    // The server's own agent-id is the authoritative threadId; a
    // worker-native thread id (if present) rides along as codexThreadId.
    payload.insert("threadId".to_owned(), Value::String(agent_id.to_owned()));
    if let Some(native) = extract_str(raw, &["threadId", "thread_id", "codexThreadId"]) {
        payload.insert("codexThreadId".to_owned(), Value::String(native));
    }

    let files = extract_files(raw).or_else(|| memo.peek(agent_id));
    if is_file_change_start(&event_type) {
        if let Some(files) = files.clone() {
            memo.remember(agent_id, files);
        }
    }
    if is_file_change_completion(&event_type) {
        if let Some(files) = files.clone().or_else(|| memo.take(agent_id)) {
            payload.insert("files".to_owned(), serde_json::to_value(&files).unwrap_or(Value::Null));
        }
        memo.clear(agent_id);
    }

    if is_error_event(&event_type) {
        let will_retry = raw
            .get("willRetry")
            .or_else(|| raw.get("will_retry"))
            .or_else(|| raw.get("recoverable"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        payload.insert("willRetry".to_owned(), Value::Bool(will_retry));
        payload.insert("will_retry".to_owned(), Value::Bool(will_retry));
    }

    let ui_type = classify_ui_type(&event_type);
    let ui_text = payload.get("text").and_then(Value::as_str).map(str::to_owned);
    let ui_command = payload.get("command").and_then(Value::as_str).map(str::to_owned);
    let ui_files = payload.get("files").and_then(Value::as_array).map(|arr| {
        arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect()
    });
    let ui_exit_code = payload
        .get("exitCode")
        .or_else(|| payload.get("exit_code"))
        .and_then(Value::as_i64);

    NormalizedEvent {
        event_type,
        ui_type,
        ui_text,
        ui_command,
        ui_files,
        ui_exit_code,
        payload: Value::Object(payload),
    }
}

#[cfg(test)]
#[path = "normalizer_tests.rs"]
#[allow(clippy::expect_used)]
mod tests;

use std::sync::Arc;

use super::*;
use crate::connection::ConnectionHub;
use crate::orchestration::OrchestrationPendingReports;

fn dispatcher() -> DynamicToolDispatcher {
    DynamicToolDispatcher::new(Arc::new(ConnectionHub::new(8, 16, 12)), Arc::new(OrchestrationPendingReports::new()))
}

#[test]
fn parses_top_level_and_nested_tool_calls() {
    let top = serde_json::json!({ "tool": "code_run", "callId": "c1", "arguments": { "command": "echo hi" } });
    let parsed = parse_dynamic_tool_call(&top).expect("top-level call");
    assert_eq!(parsed.tool, "code_run");
    assert_eq!(parsed.call_id, "c1");

    let nested = serde_json::json!({ "msg": { "tool": "orchestration_send_message", "call_id": "c2", "arguments": {} } });
    let parsed = parse_dynamic_tool_call(&nested).expect("nested call");
    assert_eq!(parsed.tool, "orchestration_send_message");
    assert_eq!(parsed.call_id, "c2");
}

#[test]
fn non_tool_payload_parses_to_none() {
    assert!(parse_dynamic_tool_call(&serde_json::json!({ "text": "hello" })).is_none());
}

#[test]
fn looks_successful_rejects_error_prefixes_and_embedded_error_keys() {
    assert!(looks_successful("done: 2 files changed"));
    assert!(!looks_successful("Error: command not found"));
    assert!(!looks_successful("failed to execute"));
    assert!(!looks_successful("unknown tool: frobnicate"));
    assert!(!looks_successful(r#"{"status":"ok","error":"partial"}"#));
}

#[test]
fn extract_file_hint_checks_known_keys_in_order() {
    assert_eq!(extract_file_hint(&serde_json::json!({ "file_path": "a.rs" })), Some("a.rs".to_owned()));
    assert_eq!(extract_file_hint(&serde_json::json!({ "path": "b.rs" })), Some("b.rs".to_owned()));
    assert_eq!(extract_file_hint(&serde_json::json!({})), None);
}

#[tokio::test]
async fn orchestration_send_message_registers_a_pending_report() {
    let dispatcher = dispatcher();
    let call = DynamicToolCall {
        tool: "orchestration_send_message".to_owned(),
        call_id: "c1".to_owned(),
        arguments: serde_json::json!({ "target_agent_id": "worker-2" }),
    };
    let result = dispatcher.dispatch("requester-1", call).await;
    assert!(result.success);
    assert_eq!(dispatcher.orchestration.drain("worker-2"), vec!["requester-1".to_owned()]);
}

#[tokio::test]
async fn orchestration_send_message_without_target_fails() {
    let dispatcher = dispatcher();
    let call = DynamicToolCall { tool: "orchestration_send_message".to_owned(), call_id: "c1".to_owned(), arguments: serde_json::json!({}) };
    let result = dispatcher.dispatch("requester-1", call).await;
    assert!(!result.success);
}

#[tokio::test]
async fn unknown_tool_is_rejected() {
    let dispatcher = dispatcher();
    let call = DynamicToolCall { tool: "frobnicate".to_owned(), call_id: "c1".to_owned(), arguments: serde_json::json!({}) };
    let result = dispatcher.dispatch("agent-1", call).await;
    assert!(!result.success);
    assert!(result.text.contains("unknown tool"));
}

#[test]
fn truncate_preview_caps_at_500_chars() {
    let long = "x".repeat(600);
    let preview = truncate_preview(&long);
    assert!(preview.chars().count() <= 503);
    assert!(preview.ends_with("..."));
}

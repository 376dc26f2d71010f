use super::*;

#[test]
fn preserves_agent_id_as_thread_id_and_copies_native_id() {
    let mut memo = FileChangeMemo::default();
    let raw = serde_json::json!({ "type": "agent_message_delta", "text": "hi", "threadId": "codex-native-1" });
    let normalized = normalize("agent-a1", &raw, &mut memo);
    assert_eq!(normalized.payload["threadId"], Value::String("agent-a1".to_owned()));
    assert_eq!(normalized.payload["codexThreadId"], Value::String("codex-native-1".to_owned()));
    assert_eq!(normalized.ui_type, UiType::MessageDelta);
    assert_eq!(normalized.ui_text.as_deref(), Some("hi"));
}

#[test]
fn merges_nested_msg_fields() {
    let mut memo = FileChangeMemo::default();
    let raw = serde_json::json!({ "type": "exec_command_begin", "msg": { "command": "cargo test" } });
    let normalized = normalize("agent-a1", &raw, &mut memo);
    assert_eq!(normalized.ui_command.as_deref(), Some("cargo test"));
    assert_eq!(normalized.ui_type, UiType::Command);
}

#[test]
fn file_change_memo_carries_files_from_start_to_complete() {
    let mut memo = FileChangeMemo::default();
    let start = serde_json::json!({ "type": "patch_start", "files": ["src/lib.rs"] });
    normalize("agent-a1", &start, &mut memo);

    let complete = serde_json::json!({ "type": "patch_complete" });
    let normalized = normalize("agent-a1", &complete, &mut memo);
    assert_eq!(normalized.ui_files, Some(vec!["src/lib.rs".to_owned()]));
    assert!(memo.peek("agent-a1").is_none());
}

#[test]
fn parses_unified_diff_headers_when_no_explicit_file_list() {
    let mut memo = FileChangeMemo::default();
    let patch_text = "--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1 +1 @@\n";
    let raw = serde_json::json!({ "type": "patch_complete", "patch": patch_text });
    let normalized = normalize("agent-a1", &raw, &mut memo);
    assert_eq!(normalized.ui_files, Some(vec!["src/lib.rs".to_owned()]));
}

#[test]
fn error_event_sets_both_will_retry_spellings() {
    let mut memo = FileChangeMemo::default();
    let raw = serde_json::json!({ "type": "stream_error", "willRetry": true });
    let normalized = normalize("agent-a1", &raw, &mut memo);
    assert_eq!(normalized.payload["willRetry"], Value::Bool(true));
    assert_eq!(normalized.payload["will_retry"], Value::Bool(true));
    assert_eq!(normalized.ui_type, UiType::Error);
}

#[test]
fn approval_and_tool_events_classify_correctly() {
    let mut memo = FileChangeMemo::default();
    let approval = serde_json::json!({ "type": "exec_approval_request" });
    assert_eq!(normalize("a", &approval, &mut memo).ui_type, UiType::ApprovalRequest);

    let tool = serde_json::json!({ "type": "dynamic_tool_call" });
    assert_eq!(normalize("a", &tool, &mut memo).ui_type, UiType::ToolCall);
}

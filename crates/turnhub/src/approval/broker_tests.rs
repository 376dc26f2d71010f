use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::*;
use crate::audit::MemoryAuditSink;
use crate::connection::ConnectionHub;
use crate::rpc::Correlator;
use crate::turn::TurnTracker;
use crate::worker::{SubmitOptions, WorkerEvent};

struct FakeWorker {
    responded: AtomicBool,
    denied: AtomicBool,
}

#[async_trait]
impl WorkerHandle for FakeWorker {
    async fn submit(&self, _input: Vec<Value>, _opts: SubmitOptions) -> Result<(), crate::error::CoordinatorError> {
        Ok(())
    }
    async fn send_command(&self, _command: &str, _args: Value) -> Result<(), crate::error::CoordinatorError> {
        Ok(())
    }
    async fn resume_thread(&self, _thread_id: &str, _cwd: Option<&str>) -> Result<(), crate::error::CoordinatorError> {
        Ok(())
    }
    async fn respond(&self, _call_id: &str, _payload: Value) -> Result<(), crate::error::CoordinatorError> {
        self.responded.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn deny(&self, _call_id: &str, _reason: &str) -> Result<(), crate::error::CoordinatorError> {
        self.denied.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn interrupt(&self) -> Result<(), crate::error::CoordinatorError> {
        Ok(())
    }
    async fn stop(&self) {}
    fn port(&self) -> Option<u16> {
        None
    }
    fn thread_id(&self) -> Option<String> {
        None
    }
    fn event_subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        broadcast::channel(1).1
    }
}

fn broker() -> ApprovalBroker {
    let hub = Arc::new(ConnectionHub::new(8, 16, 12));
    let correlator = Arc::new(Correlator::new());
    let (tracker, _events) = TurnTracker::new(Duration::from_secs(600), Duration::from_secs(60), Duration::from_secs(10), 512, Duration::from_secs(1800));
    let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());
    ApprovalBroker::new(hub, correlator, tracker, audit, Duration::from_secs(60), Arc::new(NoNotifyHook))
}

#[test]
fn heartbeat_interval_has_a_ten_second_floor() {
    assert_eq!(heartbeat_interval(Duration::from_secs(30)), Duration::from_secs(10));
    assert_eq!(heartbeat_interval(Duration::from_secs(120)), Duration::from_secs(20));
}

#[test]
fn decode_decision_accepts_bool_and_string_forms() {
    assert_eq!(decode_decision(&serde_json::json!({ "approved": true })), ApprovalDecision::Approved);
    assert_eq!(decode_decision(&serde_json::json!({ "decision": "approve" })), ApprovalDecision::Approved);
    assert_eq!(decode_decision(&serde_json::json!({ "approved": false })), ApprovalDecision::Denied);
    assert_eq!(decode_decision(&serde_json::json!({})), ApprovalDecision::Denied);
}

#[tokio::test]
async fn no_connection_and_no_hook_fails_closed_and_relays_denial() {
    let broker = broker();
    let worker = FakeWorker { responded: AtomicBool::new(false), denied: AtomicBool::new(false) };
    let decision = broker.resolve(&worker, "agent-1", "exec/approval", "call-1", serde_json::json!({})).await;
    assert_eq!(decision, ApprovalDecision::Denied);
    assert!(worker.denied.load(Ordering::SeqCst));
    assert!(!worker.responded.load(Ordering::SeqCst));
}

#[tokio::test]
async fn concurrent_duplicate_approval_id_is_rejected() {
    let broker = broker();
    assert!(broker.dedup.begin("agent-1", "exec/approval", "call-1"));
    assert!(!broker.dedup.begin("agent-1", "exec/approval", "call-1"));
    broker.dedup.end("agent-1", "exec/approval", "call-1");
    assert!(broker.dedup.begin("agent-1", "exec/approval", "call-1"));
}

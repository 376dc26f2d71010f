//! Test doubles for exercising the coordinator end to end without a real
//! worker subprocess.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use turnhub::error::CoordinatorError;
use turnhub::worker::{SubmitOptions, WorkerEvent, WorkerHandle};

/// An in-process worker double: `submit`/`interrupt`/`respond` etc. just
/// record what was asked of them, and the test pushes events on its behalf
/// via [`FakeWorker::emit`] to drive the turn tracker exactly as a real
/// worker's stdout stream would.
pub struct FakeWorker {
    pub agent_id: String,
    events_tx: broadcast::Sender<WorkerEvent>,
    interrupted: AtomicBool,
    stopped: AtomicBool,
    responses: Mutex<Vec<(String, Value)>>,
    denials: Mutex<Vec<(String, String)>>,
    submissions: Mutex<Vec<Vec<Value>>>,
}

impl FakeWorker {
    pub fn new(agent_id: impl Into<String>) -> std::sync::Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        std::sync::Arc::new(Self {
            agent_id: agent_id.into(),
            events_tx,
            interrupted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            responses: Mutex::new(Vec::new()),
            denials: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
        })
    }

    /// Push a raw event as if it had arrived on the worker's stdout.
    pub fn emit(&self, payload: Value) {
        let _ = self.events_tx.send(WorkerEvent { agent_id: self.agent_id.clone(), payload });
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn responses(&self) -> Vec<(String, Value)> {
        self.responses.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn denials(&self) -> Vec<(String, String)> {
        self.denials.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn submissions(&self) -> Vec<Vec<Value>> {
        self.submissions.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl WorkerHandle for FakeWorker {
    async fn submit(&self, input: Vec<Value>, _opts: SubmitOptions) -> Result<(), CoordinatorError> {
        self.submissions.lock().unwrap_or_else(|p| p.into_inner()).push(input);
        Ok(())
    }

    async fn send_command(&self, _command: &str, _args: Value) -> Result<(), CoordinatorError> {
        Ok(())
    }

    async fn resume_thread(&self, _thread_id: &str, _cwd: Option<&str>) -> Result<(), CoordinatorError> {
        Ok(())
    }

    async fn respond(&self, call_id: &str, payload: Value) -> Result<(), CoordinatorError> {
        self.responses.lock().unwrap_or_else(|p| p.into_inner()).push((call_id.to_owned(), payload));
        Ok(())
    }

    async fn deny(&self, call_id: &str, reason: &str) -> Result<(), CoordinatorError> {
        self.denials.lock().unwrap_or_else(|p| p.into_inner()).push((call_id.to_owned(), reason.to_owned()));
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), CoordinatorError> {
        self.interrupted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn port(&self) -> Option<u16> {
        None
    }

    fn thread_id(&self) -> Option<String> {
        None
    }

    fn event_subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events_tx.subscribe()
    }
}

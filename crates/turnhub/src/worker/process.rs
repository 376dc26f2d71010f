// SPDX-License-Identifier: BUSL-1.1

//! Subprocess-backed `WorkerHandle` (A5): one reader task translates the
//! worker's newline-delimited JSON event stream into [`WorkerEvent`]s, one
//! mutex-guarded stdin handle carries commands down.

use std::path::Path;
use std::process::Stdio;
use std::sync::RwLock as StdRwLock;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CoordinatorError;
use crate::panic_guard;
use crate::worker::handle::{SubmitOptions, WorkerEvent, WorkerHandle};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct ProcessWorker {
    agent_id: String,
    thread_id: StdRwLock<Option<String>>,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    events_tx: broadcast::Sender<WorkerEvent>,
    cancel: CancellationToken,
}

impl ProcessWorker {
    pub async fn spawn(
        agent_id: String,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        cancel: CancellationToken,
    ) -> Result<std::sync::Arc<Self>, CoordinatorError> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let mut child =
            cmd.spawn().map_err(|e| CoordinatorError::Transport(format!("failed to launch worker: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoordinatorError::Internal("worker child has no stdin".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoordinatorError::Internal("worker child has no stdout".to_owned()))?;
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let worker = std::sync::Arc::new(Self {
            agent_id,
            thread_id: StdRwLock::new(None),
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            events_tx,
            cancel,
        });

        worker.clone().spawn_reader(stdout);
        Ok(worker)
    }

    fn spawn_reader(self: std::sync::Arc<Self>, stdout: tokio::process::ChildStdout) {
        let agent_id = self.agent_id.clone();
        let tx = self.events_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            panic_guard::guard("worker_stdout_reader", async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = lines.next_line() => {
                            match next {
                                Ok(Some(line)) => {
                                    if line.trim().is_empty() {
                                        continue;
                                    }
                                    match serde_json::from_str::<Value>(&line) {
                                        Ok(payload) => {
                                            let _ = tx.send(WorkerEvent { agent_id: agent_id.clone(), payload });
                                        }
                                        Err(e) => warn!(%agent_id, error = %e, "worker emitted malformed event line"),
                                    }
                                }
                                Ok(None) => {
                                    info!(%agent_id, "worker stdout closed");
                                    break;
                                }
                                Err(e) => {
                                    warn!(%agent_id, error = %e, "error reading worker stdout");
                                    break;
                                }
                            }
                        }
                    }
                }
            })
            .await;
        });
    }

    async fn write_command(&self, value: Value) -> Result<(), CoordinatorError> {
        let mut line = serde_json::to_vec(&value).map_err(|e| CoordinatorError::Internal(e.to_string()))?;
        line.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(&line)
            .await
            .map_err(|e| CoordinatorError::Transport(format!("worker stdin write failed: {e}")))
    }

}

#[async_trait]
impl WorkerHandle for ProcessWorker {
    async fn stop(&self) {
        self.cancel.cancel();
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            warn!(agent_id = %self.agent_id, error = %e, "failed to kill worker process");
        }
    }

    async fn submit(&self, input: Vec<Value>, opts: SubmitOptions) -> Result<(), CoordinatorError> {
        self.write_command(serde_json::json!({
            "op": "submit",
            "input": input,
            "images": opts.images,
            "files": opts.files,
            "outputSchema": opts.output_schema,
        }))
        .await
    }

    async fn send_command(&self, command: &str, args: Value) -> Result<(), CoordinatorError> {
        self.write_command(serde_json::json!({ "op": "command", "command": command, "args": args })).await
    }

    async fn resume_thread(&self, thread_id: &str, cwd: Option<&str>) -> Result<(), CoordinatorError> {
        self.write_command(serde_json::json!({ "op": "resume", "threadId": thread_id, "cwd": cwd })).await?;
        if let Ok(mut guard) = self.thread_id.write() {
            *guard = Some(thread_id.to_owned());
        }
        Ok(())
    }

    async fn respond(&self, call_id: &str, payload: Value) -> Result<(), CoordinatorError> {
        self.write_command(serde_json::json!({ "op": "respond", "callId": call_id, "payload": payload })).await
    }

    async fn deny(&self, call_id: &str, reason: &str) -> Result<(), CoordinatorError> {
        self.write_command(serde_json::json!({ "op": "deny", "callId": call_id, "reason": reason })).await
    }

    async fn interrupt(&self) -> Result<(), CoordinatorError> {
        self.write_command(serde_json::json!({ "op": "interrupt" })).await
    }

    fn port(&self) -> Option<u16> {
        None
    }

    fn thread_id(&self) -> Option<String> {
        self.thread_id.read().ok().and_then(|g| g.clone())
    }

    fn event_subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events_tx.subscribe()
    }
}

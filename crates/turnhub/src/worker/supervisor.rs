// SPDX-License-Identifier: BUSL-1.1

//! Worker Supervisor (C4): launch/stop/get worker subprocesses by agent id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CoordinatorError;
use crate::worker::handle::{WorkerEvent, WorkerHandle};
use crate::worker::process::ProcessWorker;

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
}

pub struct WorkerSupervisor {
    workers: RwLock<HashMap<String, Arc<dyn WorkerHandle>>>,
    shutdown: CancellationToken,
    events_tx: tokio::sync::mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerSupervisor {
    pub fn new(shutdown: CancellationToken) -> (Self, tokio::sync::mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { workers: RwLock::new(HashMap::new()), shutdown, events_tx }, events_rx)
    }

    /// Idempotent from the caller's perspective: if a worker for `agent_id`
    /// is already running, return the existing handle (§4.4).
    pub async fn launch(&self, agent_id: &str, spec: &LaunchSpec) -> Result<Arc<dyn WorkerHandle>, CoordinatorError> {
        if let Some(existing) = self.get(agent_id).await {
            return Ok(existing);
        }
        let cwd = spec.cwd.as_ref().map(Path::new);
        let child_cancel = self.shutdown.child_token();
        let worker =
            ProcessWorker::spawn(agent_id.to_owned(), &spec.program, &spec.args, cwd, child_cancel).await?;
        let handle: Arc<dyn WorkerHandle> = worker;
        self.workers.write().await.insert(agent_id.to_owned(), handle.clone());
        self.spawn_event_pump(agent_id, handle.clone());
        info!(%agent_id, "worker launched");
        Ok(handle)
    }

    /// Forward every event a worker emits onto the supervisor-wide channel,
    /// until the worker itself is removed and its cancellation fires (§4.4).
    fn spawn_event_pump(&self, agent_id: &str, handle: Arc<dyn WorkerHandle>) {
        let mut rx = handle.event_subscribe();
        let tx = self.events_tx.clone();
        let cancel = self.shutdown.child_token();
        let agent_id = agent_id.to_owned();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            info!(%agent_id, "worker event stream closed");
                            break;
                        }
                    },
                }
            }
        });
    }

    /// Register a pre-built handle directly, bypassing subprocess launch.
    /// Used by in-process test doubles that stand in for a real worker.
    pub async fn insert(&self, agent_id: &str, handle: Arc<dyn WorkerHandle>) {
        self.workers.write().await.insert(agent_id.to_owned(), handle.clone());
        self.spawn_event_pump(agent_id, handle);
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<dyn WorkerHandle>> {
        self.workers.read().await.get(agent_id).cloned()
    }

    pub async fn stop(&self, agent_id: &str) {
        if let Some(handle) = self.workers.write().await.remove(agent_id) {
            handle.stop().await;
            info!(%agent_id, "worker stopped");
        }
    }

    pub async fn is_running(&self, agent_id: &str) -> bool {
        self.workers.read().await.contains_key(agent_id)
    }
}

// SPDX-License-Identifier: BUSL-1.1

//! Pending-Request Correlator (C3): server-originated requests to a client,
//! matched against the client's reply by a monotonic integer id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::connection::hub::{ConnId, ConnectionHub};
use crate::error::{CoordinatorError, RpcError};
use crate::rpc::envelope::RpcRequestOut;

/// Server→client request deadline (spec §5 "Server→client request: 5 min").
pub const SEND_AND_WAIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
pub enum PendingReply {
    Result(Value),
    Error(RpcError),
}

/// Allocates monotonic request ids and delivers replies to single-shot
/// waiters. Guarded by a plain mutex (§5): held only around map operations,
/// never across a send or the wait itself.
pub struct Correlator {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<PendingReply>>>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self { next_id: AtomicI64::new(1), pending: Mutex::new(HashMap::new()) }
    }

    /// Hand out the next id and register a receive channel for it.
    pub fn alloc(&self) -> (i64, oneshot::Receiver<PendingReply>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).insert(id, tx);
        (id, rx)
    }

    /// Deliver a reply non-blocking. If there is no waiter, or the waiter has
    /// already gone away, drop and log (§4.3) — never blocks the caller.
    pub fn resolve(&self, id: i64, reply: PendingReply) {
        let sender = self.pending.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
        match sender {
            Some(tx) => {
                if tx.send(reply).is_err() {
                    warn!(id, "correlator: waiter gone before reply delivery");
                }
            }
            None => warn!(id, "correlator: no waiter registered for reply"),
        }
    }

    fn cancel(&self, id: i64) {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Serialize a request, enqueue it to `conn_id` (honoring the hub's
    /// backpressure policy), then wait up to [`SEND_AND_WAIT_TIMEOUT`] for the
    /// client's reply.
    pub async fn send_and_wait(
        &self,
        hub: &ConnectionHub,
        conn_id: ConnId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, CoordinatorError> {
        let (id, rx) = self.alloc();
        let request = RpcRequestOut { jsonrpc: "2.0", id, method: method.to_owned(), params };
        let payload = match serde_json::to_vec(&request) {
            Ok(p) => p,
            Err(e) => {
                self.cancel(id);
                return Err(CoordinatorError::Internal(format!("failed to serialize request: {e}")));
            }
        };
        if let Err(e) = hub.send_to_one(conn_id, payload).await {
            self.cancel(id);
            return Err(CoordinatorError::Transport(e.to_string()));
        }
        match tokio::time::timeout(SEND_AND_WAIT_TIMEOUT, rx).await {
            Ok(Ok(PendingReply::Result(v))) => Ok(v),
            Ok(Ok(PendingReply::Error(e))) => Err(CoordinatorError::Transport(e.message)),
            Ok(Err(_)) => Err(CoordinatorError::Transport("correlator channel dropped".to_owned())),
            Err(_) => {
                self.cancel(id);
                Err(CoordinatorError::Timeout(format!("no reply to {method} within deadline")))
            }
        }
    }
}

#[cfg(test)]
#[path = "correlator_tests.rs"]
mod tests;

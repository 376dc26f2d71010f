// SPDX-License-Identifier: BUSL-1.1

//! Connection Hub (C1): accept, per-connection bounded outbox with
//! backpressure-disconnect, snapshot-based broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::connection::conn::Connection;
use crate::error::CoordinatorError;

pub type ConnId = uuid::Uuid;

/// Local-origin allowlist (spec §4.1): no Origin header, or one of these
/// scheme://host prefixes.
const LOCAL_ORIGIN_PREFIXES: &[&str] = &[
    "http://localhost",
    "https://localhost",
    "http://127.0.0.1",
    "https://127.0.0.1",
    "http://[::1]",
    "https://[::1]",
    "desktop-bridge://",
];

pub fn is_local_origin(origin: Option<&str>) -> bool {
    match origin {
        None => true,
        Some(o) => LOCAL_ORIGIN_PREFIXES.iter().any(|prefix| o.starts_with(prefix)),
    }
}

pub struct ConnectionHub {
    connections: RwLock<HashMap<ConnId, Arc<Connection>>>,
    max_connections: usize,
    outbox_capacity: usize,
    backlog_cut: usize,
}

impl ConnectionHub {
    pub fn new(max_connections: usize, outbox_capacity: usize, backlog_cut: usize) -> Self {
        Self { connections: RwLock::new(HashMap::new()), max_connections, outbox_capacity, backlog_cut }
    }

    /// Register a new connection, rejecting it if the hub is already at
    /// `maxConnections`. Returns the receiving half of the outbox for the
    /// caller's write-loop to drain.
    pub async fn accept(&self) -> Result<(ConnId, mpsc::Receiver<Vec<u8>>), CoordinatorError> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.max_connections {
            return Err(CoordinatorError::Overload { retry_after_ms: 500 });
        }
        let id = uuid::Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        connections.insert(id, Arc::new(Connection::new(id, tx, self.outbox_capacity)));
        info!(conn_id = %id, total = connections.len(), "connection accepted");
        Ok((id, rx))
    }

    fn get(&self, id: ConnId) -> Option<Arc<Connection>> {
        self.connections.try_read().ok().and_then(|c| c.get(&id).cloned())
    }

    async fn get_async(&self, id: ConnId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(&id).cloned()
    }

    /// Enqueue `payload` to one connection's outbox, non-blocking. A full
    /// outbox disconnects the slow client rather than ever blocking the
    /// caller (§4.1/§5).
    pub async fn send_to_one(&self, id: ConnId, payload: Vec<u8>) -> Result<(), CoordinatorError> {
        let conn = self
            .get_async(id)
            .await
            .ok_or_else(|| CoordinatorError::NotFound(format!("connection {id} not found")))?;
        match conn.outbox_tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %id, "outbox saturated, disconnecting");
                self.disconnect(id).await;
                Err(CoordinatorError::Overload { retry_after_ms: 500 })
            }
            Err(TrySendError::Closed(_)) => Err(CoordinatorError::Transport("connection closed".to_owned())),
        }
    }

    /// Like [`Self::send_to_one`], but first checks `connBacklogCut`: a
    /// request answered while the outbox is already backed up gets a
    /// retryable overload error instead of being enqueued at all (§4.1).
    pub async fn send_response(&self, id: ConnId, payload: Vec<u8>) -> Result<(), CoordinatorError> {
        let conn = self
            .get_async(id)
            .await
            .ok_or_else(|| CoordinatorError::NotFound(format!("connection {id} not found")))?;
        if conn.depth() >= self.backlog_cut {
            return Err(CoordinatorError::Overload { retry_after_ms: 500 });
        }
        self.send_to_one(id, payload).await
    }

    /// Broadcast to every live connection. Takes a snapshot under the read
    /// lock so writes never happen while the map is held (§4.1/§5).
    pub async fn broadcast(&self, payload: Vec<u8>) {
        let snapshot: Vec<Arc<Connection>> = self.connections.read().await.values().cloned().collect();
        for conn in snapshot {
            if let Err(TrySendError::Full(_)) = conn.outbox_tx.try_send(payload.clone()) {
                warn!(conn_id = %conn.id, "broadcast outbox saturated, disconnecting");
                self.disconnect(conn.id).await;
            }
        }
    }

    pub async fn disconnect(&self, id: ConnId) {
        let removed = self.connections.write().await.remove(&id);
        if let Some(conn) = removed {
            conn.mark_closed();
            info!(conn_id = %id, "connection disconnected");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Pick an arbitrary live connection to carry a server→client request
    /// (§4.7 "send a server→client request over any live connection").
    pub async fn any_connection(&self) -> Option<ConnId> {
        self.connections.read().await.keys().next().copied()
    }

    pub fn is_live(&self, id: ConnId) -> bool {
        self.get(id).is_some_and(|c| !c.is_closed())
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
#[allow(clippy::expect_used)]
mod tests;

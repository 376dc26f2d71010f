// SPDX-License-Identifier: BUSL-1.1

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

/// A single duplex client connection's shared handle: a bounded outbox the
/// write-loop drains, and a close-once flag. The socket itself lives only in
/// the read-loop/write-loop tasks (§3 "co-owned by Hub... and disconnect
/// path").
pub struct Connection {
    pub id: super::hub::ConnId,
    pub(super) outbox_tx: mpsc::Sender<Vec<u8>>,
    pub(super) outbox_capacity: usize,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(id: super::hub::ConnId, outbox_tx: mpsc::Sender<Vec<u8>>, outbox_capacity: usize) -> Self {
        Self { id, outbox_tx, outbox_capacity, closed: AtomicBool::new(false) }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(super) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Current outbox depth: how many frames are queued for the write-loop.
    pub fn depth(&self) -> usize {
        self.outbox_capacity.saturating_sub(self.outbox_tx.capacity())
    }
}

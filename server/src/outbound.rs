//! Per-session outbound queue with depth-based backpressure.
//!
//! Every session owns one unbounded channel drained by its writer task. The
//! depth counter is shared with the writer so senders can see how far behind
//! the socket is and drop instead of queueing more.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use tokio::sync::mpsc;

/// Normal sends are dropped once this many writes are pending.
pub const SEND_QUEUE_LIMIT: usize = 80;

/// Loopback sends (acks, chat echoes, refusals) get a little more headroom.
pub const ALT_SEND_QUEUE_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Data(Bytes),
    /// Flush what is queued, then close the transport.
    Close,
}

/// Sending half, stored in the session registry.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Outgoing>,
    depth: Arc<AtomicUsize>,
}

/// Receiving half, owned by the writer task.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<Outgoing>,
    depth: Arc<AtomicUsize>,
}

impl Outbound {
    pub fn channel() -> (Outbound, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            Outbound {
                tx,
                depth: Arc::clone(&depth),
            },
            OutboundReceiver { rx, depth },
        )
    }

    /// Queues `data` unless the writer is more than [`SEND_QUEUE_LIMIT`]
    /// writes behind. Returns false when the data was dropped.
    pub fn send(&self, data: Bytes) -> bool {
        self.push(data, SEND_QUEUE_LIMIT)
    }

    /// Like [`Outbound::send`] with [`ALT_SEND_QUEUE_LIMIT`].
    pub fn send_alt(&self, data: Bytes) -> bool {
        self.push(data, ALT_SEND_QUEUE_LIMIT)
    }

    fn push(&self, data: Bytes, limit: usize) -> bool {
        let depth = self.depth.load(Ordering::Acquire);
        if depth > limit {
            debug!("dropping {} bytes, {} writes pending", data.len(), depth);
            return false;
        }
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(Outgoing::Data(data)).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Asks the writer to close the transport after pending writes.
    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }

    /// Writes queued but not yet taken by the writer.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl OutboundReceiver {
    pub async fn recv(&mut self) -> Option<Outgoing> {
        let message = self.rx.recv().await;
        self.taken(&message);
        message
    }

    pub fn try_recv(&mut self) -> Option<Outgoing> {
        let message = self.rx.try_recv().ok();
        self.taken(&message);
        message
    }

    /// Collects every queued data chunk, stopping at a close.
    pub fn drain_data(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(Outgoing::Data(data)) = self.try_recv() {
            out.push(data);
        }
        out
    }

    fn taken(&self, message: &Option<Outgoing>) {
        if let Some(Outgoing::Data(_)) = message {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

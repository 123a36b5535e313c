//! Byte-budgeted batching of outbound frames.

use bytes::{Bytes, BytesMut};

/// Default budget of one batch.
pub const QUEUE_MAX_BULK_SIZE: usize = 4096;

/// Accumulates frames bound for one destination.
///
/// The buffer never grows past the budget, except when a single frame is
/// larger than the budget on its own; that frame then travels alone.
#[derive(Debug)]
pub struct Batch {
    buf: BytesMut,
    budget: usize,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(QUEUE_MAX_BULK_SIZE)
    }
}

impl Batch {
    pub fn new(budget: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            budget,
        }
    }

    /// Appends `frame`. Returns the previous contents when they had to be
    /// flushed first to stay within budget.
    pub fn push(&mut self, frame: &[u8]) -> Option<Bytes> {
        let flushed = if !self.buf.is_empty() && self.buf.len() + frame.len() > self.budget {
            Some(self.buf.split().freeze())
        } else {
            None
        };
        self.buf.extend_from_slice(frame);
        flushed
    }

    /// Takes whatever is buffered.
    pub fn take(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

use crate::port::Subscriber;
use crate::proto::codec;

pub const RX_BUFFER_CAPACITY: usize = 2000;

/// Bounded FIFO of normalized chunks; a full buffer drops its oldest entry.
#[derive(Debug)]
pub struct RxBuffer {
    entries: Mutex<VecDeque<Vec<String>>>,
    capacity: usize,
}

impl RxBuffer {
    pub fn new() -> Self {
        Self::with_capacity(RX_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// Never blocks. Returns the evicted entry, if any.
    pub fn push(&self, entry: Vec<String>) -> Option<Vec<String>> {
        let mut entries = self.entries.lock();
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(entry);
        evicted
    }

    /// `None` means empty; callers keep polling.
    pub fn pop(&self) -> Option<Vec<String>> {
        self.entries.lock().pop_front()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport subscriber that normalizes each chunk into one buffer entry.
pub fn feed(buffer: Arc<RxBuffer>) -> Subscriber {
    Arc::new(move |chunk: &[u8]| {
        let fragments = codec::normalize(chunk);
        if fragments.is_empty() {
            return;
        }
        trace!(?fragments, "serial event received");
        buffer.push(fragments);
    })
}

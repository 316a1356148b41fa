//! In-memory [`Transport`] for exercising the gateway without hardware.
//!
//! Writes are recorded with timestamps. Replies can be scripted per request:
//! when a write equals a scripted request, the response is delivered after a
//! delay on a separate thread, like a real device answering over the wire.
//!
//! ```
//! use std::time::Duration;
//! use at_gateway::mock::MockTransport;
//!
//! let mock = MockTransport::new();
//! mock.reply_to("ATI:\r", "TELEGESIS R120\r\n", Duration::from_millis(10));
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{GatewayError, Result};
use crate::port::{Subscriber, Subscribers, SubscriptionId, Transport};

#[derive(Debug, Clone)]
struct Reply {
    request: Vec<u8>,
    response: Vec<u8>,
    delay: Duration,
}

/// One call to [`Transport::write`].
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub data: Vec<u8>,
    pub at: Instant,
}

#[derive(Default)]
pub struct MockTransport {
    closed: Arc<AtomicBool>,
    closes: AtomicUsize,
    subscribers: Arc<Subscribers>,
    writes: Mutex<Vec<WriteRecord>>,
    replies: Mutex<Vec<Reply>>,
    // Set from a scripted write until its last reply is delivered.
    awaiting_reply: Arc<AtomicBool>,
    overlaps: AtomicUsize,
    panic_on_write: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every write equal to `request` is answered with `response` after `delay`.
    /// Several replies may be scripted for the same request.
    pub fn reply_to(&self, request: &str, response: &str, delay: Duration) {
        self.replies.lock().push(Reply {
            request: request.as_bytes().to_vec(),
            response: response.as_bytes().to_vec(),
            delay,
        });
    }

    /// Deliver a chunk on the calling thread, as if the device sent it.
    pub fn inject(&self, chunk: &[u8]) {
        self.subscribers.deliver(chunk);
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.writes.lock().iter().map(|w| w.data.clone()).collect()
    }

    /// Writes that arrived while a previous scripted reply was still pending.
    pub fn overlapping_writes(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of times `close` actually closed the transport.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Make the next writes panic, to exercise the worker fault path.
    pub fn set_panic_on_write(&self, on: bool) {
        self.panic_on_write.store(on, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn write(&self, data: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Disconnected);
        }
        if self.panic_on_write.load(Ordering::SeqCst) {
            panic!("mock transport write failure");
        }
        self.writes.lock().push(WriteRecord {
            data: data.to_vec(),
            at: Instant::now(),
        });

        let scripted: Vec<Reply> = self
            .replies
            .lock()
            .iter()
            .filter(|r| r.request == data)
            .cloned()
            .collect();
        if scripted.is_empty() {
            return Ok(());
        }
        if self.awaiting_reply.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let remaining = Arc::new(AtomicUsize::new(scripted.len()));
        for reply in scripted {
            let remaining = Arc::clone(&remaining);
            let subscribers = Arc::clone(&self.subscribers);
            let awaiting = Arc::clone(&self.awaiting_reply);
            let closed = Arc::clone(&self.closed);
            thread::spawn(move || {
                thread::sleep(reply.delay);
                // Cleared before delivery: the next write can only follow it.
                if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                    awaiting.store(false, Ordering::SeqCst);
                }
                if !closed.load(Ordering::SeqCst) {
                    subscribers.deliver(&reply.response);
                }
            });
        }
        Ok(())
    }

    fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        self.subscribers.add(subscriber)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

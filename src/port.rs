use parking_lot::{Mutex, RwLock};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::cli::SerialOpts;
use crate::error::{GatewayError, Result};

/// Read timeout; bounds how long the reader takes to notice a close.
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 4096;

/// Callback invoked with every chunk read from the device.
pub type Subscriber = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Duplex byte link to the device with push delivery of incoming chunks.
///
/// Chunks are handed to subscribers in arrival order on a delivery thread
/// owned by the transport, never on the writer's thread.
pub trait Transport: Send + Sync {
    /// Fails with [`GatewayError::Disconnected`] once closed.
    fn write(&self, data: &[u8]) -> Result<()>;
    fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
    /// Idempotent.
    fn close(&self);
    fn is_open(&self) -> bool;
}

/// Observer registry that tolerates add/remove while a chunk is being delivered.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    entries: RwLock<Vec<(SubscriptionId, Subscriber)>>,
}

impl Subscribers {
    pub fn add(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, subscriber));
        id
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(sid, _)| *sid != id);
        entries.len() != before
    }

    /// Snapshot then call, so callbacks may (un)subscribe without deadlocking.
    pub fn deliver(&self, chunk: &[u8]) {
        let snapshot: Vec<Subscriber> = self
            .entries
            .read()
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in snapshot {
            subscriber(chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Closes the transport when dropped, on every return path of its owner.
pub struct CloseGuard(Arc<dyn Transport>);

impl CloseGuard {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self(transport)
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

pub fn open_port(opts: &SerialOpts) -> Result<Box<dyn SerialPort>> {
    let builder = serialport::new(&opts.dev, opts.baud)
        .timeout(READ_TIMEOUT)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(if opts.rtscts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        });

    builder.open().map_err(|source| GatewayError::Unavailable {
        dev: opts.dev.clone(),
        source,
    })
}

/// [`Transport`] over a local serial port. A reader thread starts on open.
pub struct SerialTransport {
    dev: String,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    open: Arc<AtomicBool>,
    subscribers: Arc<Subscribers>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    pub fn open(opts: &SerialOpts) -> Result<Arc<Self>> {
        debug!(dev = %opts.dev, baud = opts.baud, "opening serial interface");
        let port = open_port(opts)?;
        let reader_port = port.try_clone().map_err(|source| GatewayError::Unavailable {
            dev: opts.dev.clone(),
            source,
        })?;

        let open = Arc::new(AtomicBool::new(true));
        let subscribers = Arc::new(Subscribers::default());
        let reader = {
            let open = Arc::clone(&open);
            let subscribers = Arc::clone(&subscribers);
            thread::Builder::new()
                .name("serial-rx".into())
                .spawn(move || read_loop(reader_port, open, subscribers))?
        };
        info!(dev = %opts.dev, baud = opts.baud, "serial interface open");

        Ok(Arc::new(Self {
            dev: opts.dev.clone(),
            writer: Mutex::new(Some(port)),
            open,
            subscribers,
            reader: Mutex::new(Some(reader)),
        }))
    }

    pub fn dev(&self) -> &str {
        &self.dev
    }
}

fn read_loop(mut port: Box<dyn SerialPort>, open: Arc<AtomicBool>, subscribers: Arc<Subscribers>) {
    let mut buf = vec![0u8; READ_CHUNK];
    while open.load(Ordering::Acquire) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                trace!(bytes = n, "serial chunk");
                subscribers.deliver(&buf[..n]);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                continue;
            }
            Err(e) => {
                if open.swap(false, Ordering::AcqRel) {
                    warn!(error = %e, "serial read failed, interface marked closed");
                }
                break;
            }
        }
    }
    debug!("serial reader stopped");
}

impl Transport for SerialTransport {
    fn write(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        let port = match writer.as_mut() {
            Some(port) if self.open.load(Ordering::Acquire) => port,
            _ => return Err(GatewayError::Disconnected),
        };
        if data.is_empty() {
            error!("cannot write a zero length payload");
            return Ok(());
        }
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        self.subscribers.add(subscriber)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        if self.writer.lock().take().is_some() {
            debug!(dev = %self.dev, "closing serial interface");
        }
        if let Some(reader) = self.reader.lock().take()
            && reader.thread().id() != thread::current().id()
        {
            let _ = reader.join();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

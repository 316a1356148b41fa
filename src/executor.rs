use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

use crate::cli::PollMode;
use crate::error::{GatewayError, Result};
use crate::listen::ListenMatcher;
use crate::port::Transport;
use crate::proto::command::{CommandKind, CommandRequest, CommandResult};
use crate::stats::{Stats, StatsSnapshot};
use crate::tx::{self, FaultAction, SendPipeline};

/// Capacity of the request and result queues.
const QUEUE_DEPTH: usize = 10;

pub const DEFAULT_LISTEN_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub send_poll: PollMode,
    pub listen_poll: Duration,
    pub on_fault: FaultAction,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            send_poll: PollMode::Busy,
            listen_poll: DEFAULT_LISTEN_POLL,
            on_fault: FaultAction::Exit,
        }
    }
}

// Request in, result out. Holding the lock is what admits a send.
struct SendSlot {
    requests: Sender<CommandRequest>,
    results: Receiver<Result<CommandResult>>,
}

/// Entry point for running catalog commands against one transport.
///
/// Only one send is ever in flight: callers queue on the admission lock and
/// the result slot is not correlated to a request, so sends cannot be
/// pipelined. Listens bypass the lock and may overlap anything.
pub struct CommandExecutor {
    transport: Arc<dyn Transport>,
    send_slot: Mutex<Option<SendSlot>>,
    worker: Option<JoinHandle<()>>,
    listen_poll: Duration,
    stats: Arc<Stats>,
}

impl CommandExecutor {
    /// Start the send worker on `transport`.
    pub fn start(transport: Arc<dyn Transport>, options: ExecutorOptions) -> Result<Self> {
        let stats = Arc::new(Stats::new());
        let (req_tx, req_rx) = crossbeam_channel::bounded(QUEUE_DEPTH);
        let (res_tx, res_rx) = crossbeam_channel::bounded(QUEUE_DEPTH);
        let pipeline = SendPipeline::new(Arc::clone(&transport), options.send_poll, Arc::clone(&stats));
        let worker = tx::spawn_worker(pipeline, req_rx, res_tx, options.on_fault)?;
        debug!("command executor started");

        Ok(Self {
            transport,
            send_slot: Mutex::new(Some(SendSlot {
                requests: req_tx,
                results: res_rx,
            })),
            worker: Some(worker),
            listen_poll: options.listen_poll,
            stats,
        })
    }

    /// Run one command to completion. Device errors and timeouts come back as
    /// `Ok` results; only transport or worker faults are `Err`.
    pub fn execute(&self, request: CommandRequest) -> Result<CommandResult> {
        let kind = request.kind();
        let outcome = match kind {
            CommandKind::Send => self.handle_send(request),
            CommandKind::Listen => Ok(self.handle_listen(&request)),
        };
        self.stats.record(kind, &outcome);
        outcome
    }

    fn handle_send(&self, request: CommandRequest) -> Result<CommandResult> {
        let slot = self.send_slot.lock();
        let slot = slot.as_ref().ok_or(GatewayError::WorkerStopped)?;
        slot.requests
            .send(request)
            .map_err(|_| GatewayError::WorkerStopped)?;
        slot.results.recv().map_err(|_| GatewayError::WorkerStopped)?
    }

    fn handle_listen(&self, request: &CommandRequest) -> CommandResult {
        ListenMatcher::run(request, self.transport.as_ref(), self.listen_poll)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, for periodic reporting off the request path.
    pub fn stats_handle(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl Drop for CommandExecutor {
    fn drop(&mut self) {
        // Closing the request queue lets the worker's loop finish.
        self.send_slot.lock().take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

use crossbeam_channel::{Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::cli::PollMode;
use crate::error::{GatewayError, Result};
use crate::port::{SubscriptionId, Transport};
use crate::proto::codec;
use crate::proto::command::{CommandDescriptor, CommandKind, CommandRequest, CommandResult};
use crate::rx::{self, RxBuffer};
use crate::stats::Stats;

/// What happens after the send worker dies mid-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultAction {
    /// Terminate the process with exit code 1.
    #[default]
    Exit,
    /// Leave the process running; later sends fail with `WorkerStopped`.
    Stop,
}

impl FaultAction {
    fn trigger(self) {
        match self {
            FaultAction::Exit => std::process::exit(1),
            FaultAction::Stop => {}
        }
    }
}

/// Writes one command at a time and matches the reply out of the receive buffer.
pub struct SendPipeline {
    transport: Arc<dyn Transport>,
    buffer: Arc<RxBuffer>,
    subscription: SubscriptionId,
    poll: PollMode,
    stats: Arc<Stats>,
}

impl SendPipeline {
    /// Subscribes a receive buffer to `transport`.
    pub fn new(transport: Arc<dyn Transport>, poll: PollMode, stats: Arc<Stats>) -> Self {
        let buffer = Arc::new(RxBuffer::new());
        let subscription = transport.subscribe(rx::feed(Arc::clone(&buffer)));
        Self {
            transport,
            buffer,
            subscription,
            poll,
            stats,
        }
    }

    /// Serve requests until every sender is gone.
    pub fn run(&self, requests: Receiver<CommandRequest>, results: Sender<Result<CommandResult>>) {
        for request in requests.iter() {
            let result = match request.kind() {
                CommandKind::Send => self.send(&request),
                CommandKind::Listen => {
                    warn!(command = request.descriptor().name(), "cannot send a listen command");
                    Err(GatewayError::Malformed(format!(
                        "{} is a listen command",
                        request.descriptor().name()
                    )))
                }
            };
            if let Ok(r) = &result {
                debug!(status = ?r.status, duration = r.duration, output = ?r.output, "command result");
            }
            if results.send(result).is_err() {
                warn!("caller went away before the result was published");
            }
        }
        debug!("request queue closed");
    }

    pub fn send(&self, request: &CommandRequest) -> Result<CommandResult> {
        let descriptor = request.descriptor();
        let command = codec::build_command_string(descriptor, request.params());
        debug!(command = %command.trim_end(), "sending command");

        // Stale output from earlier commands must not satisfy this one.
        self.buffer.clear();
        let start = Instant::now();
        self.transport.write(command.as_bytes())?;
        self.stats.add_bytes(command.len());
        Ok(self.await_response(descriptor, start))
    }

    fn await_response(&self, descriptor: &CommandDescriptor, start: Instant) -> CommandResult {
        // Past the representable range there is no deadline.
        let deadline = start.checked_add(descriptor.timeout());
        while deadline.is_none_or(|d| Instant::now() <= d) {
            let Some(entry) = self.buffer.pop() else {
                self.poll.idle();
                continue;
            };
            if codec::has_errored(&entry) {
                return CommandResult::error(entry, start.elapsed());
            }
            let matched = codec::find_match(&entry, descriptor.matcher());
            if !matched.is_empty() {
                return CommandResult::success(matched, start.elapsed());
            }
        }
        debug!(command = descriptor.name(), "command timed out");
        CommandResult::timeout()
    }
}

impl Drop for SendPipeline {
    fn drop(&mut self) {
        self.transport.unsubscribe(self.subscription);
    }
}

/// Start the worker thread. A panic inside it closes the transport and then
/// applies `on_fault`.
pub fn spawn_worker(
    pipeline: SendPipeline,
    requests: Receiver<CommandRequest>,
    results: Sender<Result<CommandResult>>,
    on_fault: FaultAction,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("send-pipeline".into())
        .spawn(move || {
            let transport = Arc::clone(&pipeline.transport);
            let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
                pipeline.run(requests, results);
            }));
            if let Err(payload) = outcome {
                error!(
                    reason = panic_reason(payload.as_ref()),
                    "send pipeline faulted, closing the serial interface"
                );
                transport.close();
                on_fault.trigger();
            }
        })?;
    Ok(handle)
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::proto::command::{CommandStatus, DEFAULT_TIMEOUT};
    use std::time::Duration;

    fn request(name: &str, timeout: Duration, expected: &str) -> CommandRequest {
        let d = CommandDescriptor::new(name, CommandKind::Send, timeout, expected).unwrap();
        CommandRequest::new(Arc::new(d), vec![])
    }

    #[test]
    fn stale_output_is_cleared_before_write() {
        let mock = MockTransport::new();
        let pipeline = SendPipeline::new(mock.clone(), PollMode::Busy, Arc::new(Stats::new()));
        mock.inject(b"TELEGESIS R120\r\n");
        let r = pipeline
            .send(&request("ATI", Duration::from_millis(100), "Telegesis"))
            .unwrap();
        assert_eq!(r.status, CommandStatus::Timeout);
        assert!(r.output.is_empty());
        assert_eq!(r.duration, 0.0);
        assert_eq!(mock.written(), vec![b"ATI:\r".to_vec()]);
    }

    #[test]
    fn non_matching_entries_are_skipped() {
        let mock = MockTransport::new();
        mock.reply_to("AT+NTABLE:\r", "AT+NTABLE:\r\n", Duration::from_millis(5));
        mock.reply_to("AT+NTABLE:\r", "NTABLE:00,01\r\nOK\r\n", Duration::from_millis(30));
        let pipeline = SendPipeline::new(mock.clone(), PollMode::Busy, Arc::new(Stats::new()));
        let r = pipeline
            .send(&request("AT+NTABLE", DEFAULT_TIMEOUT, "Ntable:"))
            .unwrap();
        assert_eq!(r.status, CommandStatus::Success);
        assert_eq!(r.output, ["NTABLE:00,01", "OK"]);
    }

    #[test]
    fn unbounded_timeout_does_not_fault_the_worker() {
        let mock = MockTransport::new();
        mock.reply_to("ATI:\r", "TELEGESIS R120\r\n", Duration::from_millis(5));
        let pipeline = SendPipeline::new(mock.clone(), PollMode::Busy, Arc::new(Stats::new()));
        let r = pipeline
            .send(&request("ATI", Duration::MAX, "Telegesis"))
            .unwrap();
        assert_eq!(r.status, CommandStatus::Success);
        assert!(mock.is_open());
    }

    #[test]
    fn closed_transport_fails_the_send() {
        let mock = MockTransport::new();
        mock.close();
        let pipeline = SendPipeline::new(mock.clone(), PollMode::Busy, Arc::new(Stats::new()));
        let err = pipeline
            .send(&request("ATI", DEFAULT_TIMEOUT, "Telegesis"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Disconnected));
    }

    #[test]
    fn dropping_the_pipeline_unsubscribes() {
        let mock = MockTransport::new();
        let pipeline = SendPipeline::new(mock.clone(), PollMode::Busy, Arc::new(Stats::new()));
        assert_eq!(mock.subscriber_count(), 1);
        drop(pipeline);
        assert_eq!(mock.subscriber_count(), 0);
    }
}

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::port::{Subscriber, Transport};
use crate::proto::codec;
use crate::proto::command::{CommandRequest, CommandResult};

/// Waits for an unsolicited device message that contains the rendered command.
///
/// Observes the transport feed directly; the send path's receive buffer is
/// never touched, so a listen can outlive any number of send round trips.
///
/// The first matching chunk is the result. Later matches that arrive before
/// the caller wakes are ignored rather than replacing it.
#[derive(Debug)]
pub struct ListenMatcher {
    command: String,
    token: String,
    timeout: Duration,
    started: Instant,
    matched: Mutex<Option<CommandResult>>,
    signal: Condvar,
}

impl ListenMatcher {
    pub fn new(request: &CommandRequest) -> Arc<Self> {
        let descriptor = request.descriptor();
        let token = codec::listen_token(descriptor, request.params());
        debug!(command = descriptor.name(), expected = %token, "listening");
        Arc::new(Self {
            command: descriptor.name().to_string(),
            token,
            timeout: descriptor.timeout(),
            started: Instant::now(),
            matched: Mutex::new(None),
            signal: Condvar::new(),
        })
    }

    /// The transport subscriber for this matcher.
    pub fn observer(self: &Arc<Self>) -> Subscriber {
        let this = Arc::clone(self);
        Arc::new(move |chunk: &[u8]| this.observe(chunk))
    }

    pub fn observe(&self, chunk: &[u8]) {
        let fragments = codec::normalize(chunk);
        if !codec::contains_token(&fragments, &self.token) {
            return;
        }
        let mut matched = self.matched.lock();
        if matched.is_some() {
            return;
        }
        debug!(command = %self.command, output = ?fragments, "got the listen output");
        *matched = Some(CommandResult::success(fragments, self.started.elapsed()));
        self.signal.notify_all();
    }

    pub fn succeeded(&self) -> bool {
        self.matched.lock().is_some()
    }

    pub fn timed_out(&self) -> bool {
        self.started.elapsed() > self.timeout
    }

    pub fn is_complete(&self) -> bool {
        self.succeeded() || self.timed_out()
    }

    /// Current outcome: the match if one arrived, otherwise a timeout result.
    pub fn result(&self) -> CommandResult {
        self.matched
            .lock()
            .clone()
            .unwrap_or_else(|| CommandResult::listen_timeout(self.timeout))
    }

    /// Block until matched or timed out, re-checking at least every `interval`.
    pub fn wait(&self, interval: Duration) -> CommandResult {
        let mut matched = self.matched.lock();
        loop {
            if let Some(result) = matched.as_ref() {
                return result.clone();
            }
            if self.timed_out() {
                return CommandResult::listen_timeout(self.timeout);
            }
            self.signal.wait_for(&mut matched, interval);
        }
    }

    /// Subscribe, wait for completion, unsubscribe.
    pub fn run(request: &CommandRequest, transport: &dyn Transport, interval: Duration) -> CommandResult {
        let matcher = Self::new(request);
        let id = transport.subscribe(matcher.observer());
        let result = matcher.wait(interval);
        transport.unsubscribe(id);
        debug!(command = %matcher.command, status = ?result.status, "stopped listening");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::command::{CommandDescriptor, CommandKind, CommandStatus};
    use std::thread;

    fn imgquery(timeout: Duration) -> CommandRequest {
        let d = CommandDescriptor::new("IMGQUERY", CommandKind::Listen, timeout, "IMGQUERY:")
            .unwrap();
        CommandRequest::new(Arc::new(d), vec![])
    }

    #[test]
    fn matches_on_containment() {
        let m = ListenMatcher::new(&imgquery(Duration::from_secs(5)));
        m.observe(b"SEQ:01\r\nOK\r\n");
        assert!(!m.succeeded());
        m.observe(b"\r\nIMGQUERY:D6D6,09,00,1039,0203,01045700,02\r\n");
        assert!(m.succeeded());
        assert!(m.is_complete());
        let r = m.result();
        assert_eq!(r.status, CommandStatus::Success);
        assert_eq!(r.output, ["IMGQUERY:D6D6,09,00,1039,0203,01045700,02"]);
    }

    #[test]
    fn first_match_is_kept() {
        let m = ListenMatcher::new(&imgquery(Duration::from_secs(5)));
        m.observe(b"IMGQUERY:AAAA,01\r\n");
        m.observe(b"IMGQUERY:BBBB,02\r\n");
        assert_eq!(m.result().output, ["IMGQUERY:AAAA,01"]);
    }

    #[test]
    fn lowercase_device_output_still_matches() {
        let m = ListenMatcher::new(&imgquery(Duration::from_secs(5)));
        m.observe(b"imgquery:d6d6,09\r\n");
        assert!(m.succeeded());
    }

    #[test]
    fn times_out_with_configured_duration() {
        let m = ListenMatcher::new(&imgquery(Duration::from_millis(50)));
        let r = m.wait(Duration::from_millis(10));
        assert_eq!(r.status, CommandStatus::Timeout);
        assert!(r.output.is_empty());
        assert_eq!(r.duration, 0.05);
        assert!(m.timed_out());
    }

    #[test]
    fn wait_wakes_on_match_before_poll_interval() {
        let m = ListenMatcher::new(&imgquery(Duration::from_secs(5)));
        let observer = m.observer();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            observer(b"IMGQUERY:D6D6,09\r\n");
        });
        let started = Instant::now();
        let r = m.wait(Duration::from_secs(2));
        t.join().unwrap();
        assert_eq!(r.status, CommandStatus::Success);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}

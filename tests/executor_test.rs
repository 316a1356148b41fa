use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use at_gateway::mock::MockTransport;
use at_gateway::tx::FaultAction;
use at_gateway::{
    Catalog, CommandDescriptor, CommandExecutor, CommandKind, CommandRequest, CommandStatus,
    ExecutorOptions, GatewayError, Transport,
};

fn executor(mock: &Arc<MockTransport>) -> CommandExecutor {
    let options = ExecutorOptions {
        on_fault: FaultAction::Stop,
        listen_poll: Duration::from_millis(5),
        ..ExecutorOptions::default()
    };
    CommandExecutor::start(mock.clone(), options).unwrap()
}

fn send(name: &str, timeout: Duration, expected: &str) -> CommandRequest {
    let d = CommandDescriptor::new(name, CommandKind::Send, timeout, expected).unwrap();
    CommandRequest::new(Arc::new(d), vec![])
}

fn builtin(key: &str) -> CommandRequest {
    Catalog::builtin().unwrap().request(key, vec![]).unwrap()
}

fn wait_for_subscribers(mock: &MockTransport, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while mock.subscriber_count() < n {
        assert!(Instant::now() < deadline, "listener never subscribed");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn ati_round_trip() {
    let mock = MockTransport::new();
    mock.reply_to("ATI:\r", "\r\nTelegesis ETRX357\r\nR309C\r\nOK\r\n", Duration::from_millis(20));
    let ex = executor(&mock);

    let r = ex.execute(builtin("ZB_ATI")).unwrap();
    assert_eq!(r.status, CommandStatus::Success);
    assert_eq!(r.output, ["TELEGESIS ETRX357", "R309C", "OK"]);
    assert!(r.duration >= 0.02 && r.duration < 1.0, "duration {}", r.duration);
    assert_eq!(mock.written(), vec![b"ATI:\r".to_vec()]);
}

#[test]
fn parameters_are_rendered_into_the_write() {
    let mock = MockTransport::new();
    mock.reply_to("AT+NTABLE:00,FF\r", "NTABLE:00,02\r\nOK\r\n", Duration::from_millis(5));
    let ex = executor(&mock);

    let catalog = Catalog::builtin().unwrap();
    let request = catalog
        .request("ZB_NTABLE", vec!["00".into(), "FF".into()])
        .unwrap();
    let r = ex.execute(request).unwrap();
    assert_eq!(r.status, CommandStatus::Success);
    assert_eq!(r.output, ["NTABLE:00,02", "OK"]);
}

#[test]
fn silent_device_times_out() {
    let mock = MockTransport::new();
    let ex = executor(&mock);

    let started = Instant::now();
    let r = ex
        .execute(send("ATI", Duration::from_millis(100), "Telegesis"))
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(r.status, CommandStatus::Timeout);
    assert!(r.output.is_empty());
    assert_eq!(r.duration, 0.0);
}

#[test]
fn device_error_is_reported() {
    let mock = MockTransport::new();
    mock.reply_to("ATI:\r", "ERROR:05\r\n", Duration::from_millis(5));
    let ex = executor(&mock);

    let r = ex.execute(builtin("ZB_ATI")).unwrap();
    assert_eq!(r.status, CommandStatus::Error);
    assert_eq!(r.output, ["ERROR:05"]);
}

#[test]
fn error_takes_precedence_over_a_match() {
    let mock = MockTransport::new();
    mock.reply_to("ATI:\r", "NACK:01\r\nTelegesis\r\n", Duration::from_millis(5));
    let ex = executor(&mock);

    let r = ex.execute(builtin("ZB_ATI")).unwrap();
    assert_eq!(r.status, CommandStatus::Error);
    assert_eq!(r.output, ["NACK:01", "TELEGESIS"]);
}

#[test]
fn concurrent_sends_never_overlap() {
    let mock = MockTransport::new();
    mock.reply_to("ATI:\r", "TELEGESIS R120\r\n", Duration::from_millis(10));
    let ex = Arc::new(executor(&mock));

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let ex = Arc::clone(&ex);
            thread::spawn(move || ex.execute(builtin("ZB_ATI")).unwrap())
        })
        .collect();
    for caller in callers {
        let r = caller.join().unwrap();
        assert_eq!(r.status, CommandStatus::Success);
        assert_eq!(r.output, ["TELEGESIS R120"]);
    }
    assert_eq!(mock.written().len(), 8);
    assert_eq!(mock.overlapping_writes(), 0);

    let writes = mock.writes();
    for pair in writes.windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(10));
    }
}

#[test]
fn listen_spans_interleaved_sends() {
    let mock = MockTransport::new();
    mock.reply_to("ATI:\r", "TELEGESIS R120\r\n", Duration::from_millis(5));
    let ex = Arc::new(executor(&mock));

    let listener = {
        let ex = Arc::clone(&ex);
        thread::spawn(move || ex.execute(builtin("ZB_IMGQUERY")).unwrap())
    };
    wait_for_subscribers(&mock, 2);

    for _ in 0..3 {
        let r = ex.execute(builtin("ZB_ATI")).unwrap();
        assert_eq!(r.status, CommandStatus::Success);
    }
    mock.inject(b"\r\nIMGQUERY:D6D6,09,00,1039,0203,01045700,02\r\n");

    let r = listener.join().unwrap();
    assert_eq!(r.status, CommandStatus::Success);
    assert_eq!(r.output, ["IMGQUERY:D6D6,09,00,1039,0203,01045700,02"]);
    // Listens are never written to the device.
    assert_eq!(mock.written().len(), 3);
    assert_eq!(mock.subscriber_count(), 1);
}

#[test]
fn listen_timeout_reports_the_configured_timeout() {
    let mock = MockTransport::new();
    let ex = executor(&mock);
    let d = CommandDescriptor::new(
        "IMGQUERY",
        CommandKind::Listen,
        Duration::from_millis(60),
        "IMGQUERY:",
    )
    .unwrap();

    let r = ex.execute(CommandRequest::new(Arc::new(d), vec![])).unwrap();
    assert_eq!(r.status, CommandStatus::Timeout);
    assert!(r.output.is_empty());
    assert_eq!(r.duration, 0.06);
    assert_eq!(mock.subscriber_count(), 1);
}

#[test]
fn closed_transport_is_disconnected() {
    let mock = MockTransport::new();
    let ex = executor(&mock);
    mock.close();

    let err = ex.execute(builtin("ZB_ATI")).unwrap_err();
    assert!(matches!(err, GatewayError::Disconnected));
    assert!(mock.written().is_empty());
}

#[test]
fn worker_fault_closes_the_transport_and_stops_sends() {
    let mock = MockTransport::new();
    let ex = executor(&mock);
    mock.set_panic_on_write(true);

    let err = ex.execute(builtin("ZB_ATI")).unwrap_err();
    assert!(matches!(err, GatewayError::WorkerStopped));
    // The worker closes the transport after the caller has been released.
    let deadline = Instant::now() + Duration::from_secs(2);
    while mock.is_open() {
        assert!(Instant::now() < deadline, "transport left open");
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(mock.close_count(), 1);

    let err = ex.execute(builtin("ZB_ATI")).unwrap_err();
    assert!(matches!(err, GatewayError::WorkerStopped));
}

#[test]
fn stats_follow_outcomes() {
    let mock = MockTransport::new();
    mock.reply_to("ATI:\r", "TELEGESIS R120\r\n", Duration::from_millis(5));
    let ex = executor(&mock);

    ex.execute(builtin("ZB_ATI")).unwrap();
    ex.execute(send("AT+NTABLE", Duration::from_millis(30), "Ntable:"))
        .unwrap();
    let snap = ex.stats();
    assert_eq!(snap.sends, 2);
    assert_eq!(snap.ok, 1);
    assert_eq!(snap.timeout, 1);
    assert_eq!(snap.failed, 0);
    assert_eq!(snap.bytes, ("ATI:\r".len() + "AT+NTABLE:\r".len()) as u64);
}

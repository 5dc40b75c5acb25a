//! spec.md §8, end-to-end scenario 3: "Timeout." Stamp a 100ms deadline
//! override on one Operation, have the mock server accept the connection but
//! never reply, and confirm the deadline sweep fails the Operation with
//! `Error::Timeout` without the caller needing to wait the 30s session
//! default.

mod common;

use std::time::{Duration, Instant};

use kinetic_tli::operation::OperationState;
use kinetic_tli::{Error, ExchangeKind, RpcKind};

#[test]
fn timeout_overrides_session_default() {
    let (listener, port) = common::start_listener();
    let server = std::thread::spawn(move || {
        // Accept and read the request, but never reply — the connection
        // stays open so this is a pure Operation-deadline timeout, not a
        // connection-abort.
        let (mut stream, _) = listener.accept().expect("accept loopback connection");
        let _ = common::read_frame(&mut stream).expect("read request");
        // Hold the connection open until the test process exits; nothing
        // further is read or written.
        std::thread::sleep(Duration::from_secs(5));
    });

    let descriptor = common::open_session(port);
    let id = kinetic_tli::submit_with_timeout(
        descriptor,
        RpcKind::Get,
        ExchangeKind::RequestResponse,
        false,
        common::build_message(b"never-answered"),
        None,
        Some(Duration::from_millis(100)),
    )
    .expect("submit with 100ms override");

    // The receiver's deadline sweep runs at most once per second (spec.md
    // §4.6), so this Operation's 100ms deadline may not be observed until
    // the first sweep fires; give it generous headroom.
    let deadline = Instant::now() + Duration::from_secs(3);
    let op = loop {
        let _ = kinetic_tli::poll(descriptor, Duration::from_millis(250));
        match kinetic_tli::reap(descriptor, id) {
            Ok(op) => break op,
            Err(Error::NotReady) => {
                assert!(Instant::now() < deadline, "operation never timed out");
            }
            Err(e) => panic!("unexpected reap error: {}", e),
        }
    };

    assert_eq!(op.state, OperationState::TimedOut);
    assert!(matches!(op.error, Some(Error::Timeout)));

    // Dropping the listener's handle (via process exit of the server
    // thread's sleep) is not awaited; the test process exiting tears the
    // mock server thread down regardless.
    drop(server);
    kinetic_tli::close(descriptor).expect("close");
}

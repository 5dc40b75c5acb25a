//! spec.md §8, end-to-end scenario 4: "Connection abort mid-flight." Submit
//! several Operations, have the mock server drop the connection after
//! accepting at least two of them, and confirm the session moves to
//! `Aborted`, every pending Operation is reapable as `ConnectionAborted`, and
//! the session can then be driven back to `Opened` via disconnect + drain.

mod common;

use std::time::{Duration, Instant};

use kinetic_tli::operation::OperationState;
use kinetic_tli::{Error, ExchangeKind, RpcKind, SessionState};

#[test]
fn connection_abort_mid_flight() {
    let (listener, port) = common::start_listener();
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept loopback connection");
        // Read at least two requests so we know they were genuinely
        // in-flight, then drop the connection without replying to anything.
        common::read_frame(&mut stream).expect("read request 1");
        common::read_frame(&mut stream).expect("read request 2");
        drop(stream);
    });

    let descriptor = common::open_session(port);
    let mut ids = Vec::new();
    for i in 0..5u8 {
        let id = kinetic_tli::submit(
            descriptor,
            RpcKind::Get,
            ExchangeKind::RequestResponse,
            false,
            common::build_message(&[i]),
            None,
        )
        .expect("submit");
        ids.push(id);
    }

    server.join().expect("mock server thread");

    // Wait for the receiver task to observe the disconnect and drive the
    // session to Aborted.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if kinetic_tli::state(descriptor).expect("state") == SessionState::Aborted {
            break;
        }
        assert!(Instant::now() < deadline, "session never reached Aborted");
        std::thread::sleep(Duration::from_millis(50));
    }

    for id in &ids {
        let op = kinetic_tli::reap(descriptor, *id).expect("reap while Aborted");
        assert_eq!(op.state, OperationState::Failed);
        assert!(matches!(op.error, Some(Error::ConnectionAborted)));
    }

    kinetic_tli::disconnect(descriptor).expect("disconnect from Aborted");
    assert_eq!(
        kinetic_tli::state(descriptor).expect("state"),
        SessionState::Draining
    );

    // All Operations were already reaped above, so the session should drain
    // straight back to Opened.
    kinetic_tli::close(descriptor).expect("close");
}

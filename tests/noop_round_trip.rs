//! spec.md §8, end-to-end scenario 1: "Noop round trip."

mod common;

use std::time::Duration;

use kinetic_tli::operation::OperationState;
use kinetic_tli::{ExchangeKind, RpcKind};

#[test]
fn noop_round_trip() {
    let (listener, port) = common::start_listener();
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept loopback connection");
        let (seq, value) = common::read_frame(&mut stream).expect("read request frame");
        common::write_frame(&mut stream, seq, &value).expect("write response frame");
    });

    let descriptor = common::open_session(port);
    let send_msg = common::build_message(b"noop");
    let id = kinetic_tli::submit(
        descriptor,
        RpcKind::Noop,
        ExchangeKind::RequestResponse,
        false,
        send_msg,
        None,
    )
    .expect("submit");

    assert!(kinetic_tli::poll(descriptor, Duration::from_secs(1)).expect("poll"));
    let op = kinetic_tli::reap(descriptor, id).expect("reap");

    assert_eq!(op.state, OperationState::Received);
    let recv = op.recv_msg.expect("response carries a recv_msg");
    assert!(recv.body.len() >= 1);

    let mut seq_buf = [0u8; 8];
    seq_buf.copy_from_slice(&recv.body[0..8]);
    let ack = u64::from_be_bytes(seq_buf);
    assert_eq!(ack, op.seq);

    server.join().expect("mock server thread");
    kinetic_tli::close(descriptor).expect("close");
}

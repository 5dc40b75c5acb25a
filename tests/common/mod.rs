//! Shared loopback mock-server plumbing for the spec.md §8 end-to-end
//! scenarios. Not a test module itself — `mod common;` it from each test
//! binary.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use kinetic_tli::framing::{FramingHeader, FramingHelpers, HEADER_LEN};

/// Trailing authentication-tag region the sender overwrites in place
/// (spec.md §9, "HMAC mutation of an already-packed outbound message").
/// This harness does not verify the tag (spec.md §4.8: the core doesn't
/// either), only reserves the bytes so `sender::stamp_auth_tag` has
/// somewhere to write.
const TAG_LEN: usize = 20;
const SEQ_LEN: usize = 8;
const BODY_FIXED_LEN: usize = SEQ_LEN + TAG_LEN;

/// Minimal `FramingHelpers`: the body is always `SEQ_LEN + TAG_LEN` bytes
/// with the sequence in the first 8 bytes; all application data travels in
/// the value slot.
pub struct TestFraming;

impl FramingHelpers for TestFraming {
    fn header_len(&self) -> usize {
        HEADER_LEN
    }

    fn body_len(&self, header: &[u8]) -> Option<u32> {
        FramingHeader::unpack(header).ok().map(|h| h.body_len)
    }

    fn value_len(&self, header: &[u8]) -> Option<u32> {
        FramingHeader::unpack(header).ok().map(|h| h.value_len)
    }

    fn set_sequence(&self, gather: &mut [Vec<u8>], seq: u64) {
        if let Some(body) = gather.get_mut(1) {
            if body.len() >= SEQ_LEN {
                body[0..SEQ_LEN].copy_from_slice(&seq.to_be_bytes());
            }
        }
    }

    fn extract_ack_sequence(&self, gather: &[Vec<u8>]) -> u64 {
        match gather.get(1) {
            Some(body) if body.len() >= SEQ_LEN => {
                let mut buf = [0u8; SEQ_LEN];
                buf.copy_from_slice(&body[0..SEQ_LEN]);
                u64::from_be_bytes(buf)
            }
            _ => 0,
        }
    }
}

/// Build a `send_msg` gather vector (`[header, body, value]`) carrying
/// `value` as its application payload. The sequence field is left zeroed;
/// the sender task stamps it at send time (spec.md §4.5).
pub fn build_message(value: &[u8]) -> Vec<Vec<u8>> {
    let body = vec![0u8; BODY_FIXED_LEN];
    let header = FramingHeader {
        body_len: body.len() as u32,
        value_len: value.len() as u32,
    }
    .pack()
    .to_vec();
    vec![header, body, value.to_vec()]
}

/// Read exactly one framed message off `stream`, returning `(seq, value)`.
pub fn read_frame(stream: &mut TcpStream) -> std::io::Result<(u64, Vec<u8>)> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header)?;
    let parsed = FramingHeader::unpack(&header).expect("mock server only ever reads valid frames");

    let mut body = vec![0u8; parsed.body_len as usize];
    stream.read_exact(&mut body)?;
    let mut value = vec![0u8; parsed.value_len as usize];
    stream.read_exact(&mut value)?;

    let mut seq_buf = [0u8; SEQ_LEN];
    seq_buf.copy_from_slice(&body[0..SEQ_LEN]);
    Ok((u64::from_be_bytes(seq_buf), value))
}

/// Write one framed response acknowledging `ack_seq` and carrying `value`.
pub fn write_frame(stream: &mut TcpStream, ack_seq: u64, value: &[u8]) -> std::io::Result<()> {
    let mut body = vec![0u8; BODY_FIXED_LEN];
    body[0..SEQ_LEN].copy_from_slice(&ack_seq.to_be_bytes());
    let header = FramingHeader {
        body_len: body.len() as u32,
        value_len: value.len() as u32,
    }
    .pack();
    stream.write_all(&header)?;
    stream.write_all(&body)?;
    stream.write_all(value)?;
    stream.flush()
}

/// Bind a loopback listener on an OS-assigned port.
pub fn start_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

/// Open and connect a session against `127.0.0.1:port` with a throwaway
/// identity/secret (spec.md §8 scenario 1 narrates these as two separate
/// caller actions: "Open session to a loopback mock; connect; submit..."; the
/// crate's `open`/`connect` split mirrors that). Also initializes the `log`
/// subscriber once per process, so a test run with `RUST_LOG=debug cargo test
/// -- --nocapture` shows the sender/receiver's state-transition logging
/// (spec.md §2's logging crate has no opinion on subscriber init; that's left
/// to whatever embeds this crate, tests included).
pub fn open_session(port: u16) -> kinetic_tli::SessionDescriptor {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = kinetic_tli::SessionConfig::new("127.0.0.1", port, 42, b"test-secret".to_vec());
    let descriptor = kinetic_tli::open(config, Box::new(TestFraming)).expect("open session");
    kinetic_tli::connect(descriptor).expect("connect session");
    descriptor
}

/// Poll then reap a specific Operation, retrying while `NotReady`, up to a
/// generous wall-clock bound so a stalled test fails instead of hanging
/// forever.
pub fn wait_and_reap(
    descriptor: kinetic_tli::SessionDescriptor,
    id: kinetic_tli::OperationId,
    poll_timeout: std::time::Duration,
) -> kinetic_tli::Result<kinetic_tli::Operation> {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let _ = kinetic_tli::poll(descriptor, poll_timeout);
        match kinetic_tli::reap(descriptor, id) {
            Ok(op) => return Ok(op),
            Err(kinetic_tli::Error::NotReady) => {
                if std::time::Instant::now() >= deadline {
                    return Err(kinetic_tli::Error::NotReady);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

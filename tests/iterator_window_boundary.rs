//! spec.md §8, end-to-end scenario 6: "Iterator across a window boundary."
//! Mock server holds 2,500 keys; its per-request max is 1,000; the caller
//! requests a range with count = 2,500. Expect the iterator to yield exactly
//! 2,500 keys in lexicographic order with no duplicates at window
//! boundaries (three windows: 1000 + 1000 + 500).

mod common;

use std::net::TcpStream;
use std::time::Duration;

use kinetic_tli::iterator::{RangeIterator, RangeRequestBuilder, RangeResponseDecoder};

const TOTAL_KEYS: usize = 2500;
const MAX_PER_REQUEST: u32 = 1000;

fn all_keys() -> Vec<Vec<u8>> {
    (0..TOTAL_KEYS)
        .map(|i| format!("key-{:05}", i).into_bytes())
        .collect()
}

/// Request value layout: `[4 bytes max BE][2 bytes after_len BE][after bytes]`.
struct TestRangeBuilder;

impl RangeRequestBuilder for TestRangeBuilder {
    fn build(&self, after: Option<&[u8]>, max: u32) -> Vec<Vec<u8>> {
        let mut value = Vec::new();
        value.extend_from_slice(&max.to_be_bytes());
        let after = after.unwrap_or(&[]);
        value.extend_from_slice(&(after.len() as u16).to_be_bytes());
        value.extend_from_slice(after);
        common::build_message(&value)
    }
}

/// Response value layout: repeated `[2 bytes key_len BE][key bytes]`.
struct TestRangeDecoder;

impl RangeResponseDecoder for TestRangeDecoder {
    fn decode(&self, _body: &[u8], value: &[u8]) -> kinetic_tli::Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        let mut offset = 0;
        while offset + 2 <= value.len() {
            let len = u16::from_be_bytes([value[offset], value[offset + 1]]) as usize;
            offset += 2;
            keys.push(value[offset..offset + len].to_vec());
            offset += len;
        }
        Ok(keys)
    }
}

fn read_range_request(stream: &mut TcpStream) -> (u64, u32, Option<Vec<u8>>) {
    let (seq, value) = common::read_frame(stream).expect("read range request frame");

    let max = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
    let after_len = u16::from_be_bytes([value[4], value[5]]) as usize;
    let after = if after_len == 0 {
        None
    } else {
        Some(value[6..6 + after_len].to_vec())
    };
    (seq, max, after)
}

fn write_range_response(stream: &mut TcpStream, ack_seq: u64, keys: &[Vec<u8>]) {
    let mut value = Vec::new();
    for key in keys {
        value.extend_from_slice(&(key.len() as u16).to_be_bytes());
        value.extend_from_slice(key);
    }
    common::write_frame(stream, ack_seq, &value).expect("write range response");
}

#[test]
fn iterator_across_window_boundary() {
    let (listener, port) = common::start_listener();
    let keys = all_keys();

    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept loopback connection");
        let mut cursor = 0usize;
        let mut requests = 0usize;

        while cursor < keys.len() {
            let (seq, max, after) = read_range_request(&mut stream);
            requests += 1;

            if let Some(after_key) = &after {
                assert_eq!(
                    &keys[cursor - 1],
                    after_key,
                    "each window's cursor must be the previous window's last key"
                );
            } else {
                assert_eq!(cursor, 0, "only the first request omits `after`");
            }

            let end = (cursor + max as usize).min(keys.len());
            let window = &keys[cursor..end];
            write_range_response(&mut stream, seq, window);
            cursor = end;
        }

        // 1000 + 1000 + 500 = three requests for 2500 keys at a 1000 cap.
        assert_eq!(requests, 3);
    });

    let descriptor = common::open_session(port);
    let mut iter = RangeIterator::new(
        descriptor,
        Box::new(TestRangeBuilder),
        Box::new(TestRangeDecoder),
        MAX_PER_REQUEST,
        Some(TOTAL_KEYS as u32),
        Duration::from_millis(500),
    );

    let mut collected = Vec::new();
    while let Some(key) = iter.next().expect("iterator step") {
        collected.push(key);
    }

    assert_eq!(collected.len(), TOTAL_KEYS);
    assert_eq!(collected, all_keys());
    // No duplicate at a window boundary (index 999/1000, 1999/2000).
    for w in collected.windows(2) {
        assert_ne!(w[0], w[1]);
    }
    assert_eq!(iter.remaining(), Some(0));

    server.join().expect("mock server thread");
    kinetic_tli::close(descriptor).expect("close");
}

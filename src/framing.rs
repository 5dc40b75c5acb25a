//! The fixed 9-byte on-wire framing header and the small vtable the codec
//! layer supplies to the core (spec.md §4.3 and §6).

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Magic byte that must begin every framing header.
pub const MAGIC: u8 = 0x46;

/// Fixed length of the on-wire framing header.
pub const HEADER_LEN: usize = 9;

/// Largest body or value length the wire format allows.
pub const MAX_LEN: u32 = 1 << 20; // 1 MiB

/// A parsed framing header: magic plus the declared body and value lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingHeader {
    pub body_len: u32,
    pub value_len: u32,
}

impl FramingHeader {
    pub fn pack(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = MAGIC;
        BigEndian::write_u32(&mut buf[1..5], self.body_len);
        BigEndian::write_u32(&mut buf[5..9], self.value_len);
        buf
    }

    pub fn unpack(bytes: &[u8]) -> Result<FramingHeader> {
        if bytes.len() != HEADER_LEN {
            return Err(Error::InvalidArgument("framing header must be 9 bytes"));
        }
        if bytes[0] != MAGIC {
            return Err(Error::ProtocolViolation("framing header magic mismatch"));
        }
        let body_len = BigEndian::read_u32(&bytes[1..5]);
        let value_len = BigEndian::read_u32(&bytes[5..9]);
        if body_len > MAX_LEN || value_len > MAX_LEN {
            return Err(Error::ProtocolViolation("declared length exceeds 1 MiB"));
        }
        Ok(FramingHeader { body_len, value_len })
    }
}

/// The entire knowledge the core has of the encoding layer (spec.md §4.3).
///
/// The codec that builds the RPC body supplies one implementation of this
/// trait to `Session::open`. The core never looks inside the body bytes
/// beyond what these five operations expose.
pub trait FramingHelpers: Send + Sync {
    /// The fixed bytes the receiver must read to learn body/value lengths.
    /// Must be in `(0, 1024]`.
    fn header_len(&self) -> usize;

    /// Parse a header buffer of `header_len()` bytes into the declared body
    /// length, or `None` if the header is malformed.
    fn body_len(&self, header: &[u8]) -> Option<u32>;

    /// Parse a header buffer of `header_len()` bytes into the declared value
    /// length, or `None` if the header is malformed.
    fn value_len(&self, header: &[u8]) -> Option<u32>;

    /// Mutate the already-encoded outbound message (header + body, `gather`)
    /// to stamp `seq` and recompute the authentication tag. This is the
    /// final mutation before the bytes hit the wire.
    fn set_sequence(&self, gather: &mut [Vec<u8>], seq: u64);

    /// Read back the sequence the peer acknowledged from an inbound message
    /// (header + body, `gather`).
    fn extract_ack_sequence(&self, gather: &[Vec<u8>]) -> u64;
}

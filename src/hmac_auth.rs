//! Request authentication (spec.md §4.8).
//!
//! The tag is computed over `len32_be(body_len) || body_bytes` using a
//! keyed hash, stamped by the sender at the moment of send so it covers
//! exactly the bytes the peer will see. This crate does not verify server
//! HMACs on the response path (spec.md §4.8: the peer is assumed
//! authenticated by TLS or the connection itself).

use byteorder::{BigEndian, ByteOrder};
use hmac::{Hmac, Mac};
use sha1::Sha1;

/// Digest length for HMAC-SHA1.
pub const TAG_LEN: usize = 20;

/// A keyed-hash authenticator over a length-prefixed body.
pub trait Authenticator: Send + Sync {
    /// Compute the authentication tag for `body`.
    fn tag(&self, body: &[u8]) -> [u8; TAG_LEN];
}

/// The default authenticator: HMAC-SHA1 keyed by the session secret.
pub struct HmacSha1Authenticator {
    key: Vec<u8>,
}

impl HmacSha1Authenticator {
    pub fn new(key: Vec<u8>) -> Self {
        HmacSha1Authenticator { key }
    }
}

impl Authenticator for HmacSha1Authenticator {
    fn tag(&self, body: &[u8]) -> [u8; TAG_LEN] {
        let mut mac = Hmac::<Sha1>::new_from_slice(&self.key)
            .expect("HMAC accepts keys of any length");
        let mut len_prefix = [0u8; 4];
        BigEndian::write_u32(&mut len_prefix, body.len() as u32);
        mac.update(&len_prefix);
        mac.update(body);
        let result = mac.finalize().into_bytes();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&result);
        tag
    }
}

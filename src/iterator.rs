//! Range Iterator (spec.md §4.11): a synchronous iterator over a key range,
//! refilling one window of keys at a time via Range RPCs submitted through
//! the ordinary submit/poll/reap surface.
//!
//! spec.md §9 REDESIGN FLAGS rules out the two-window prefetch the C source
//! describes. This iterator fetches the next window only once the current
//! one is exhausted: no second buffer, and so nothing for the boundary
//! between two windows to share a dangling pointer into.

use std::collections::VecDeque;
use std::time::Duration;

use crate::api;
use crate::error::{Error, Result};
use crate::operation::ExchangeKind;
use crate::operation::RpcKind;
use crate::table::SessionDescriptor;

/// Builds the outbound Range request body for "give me up to `max` keys
/// strictly after `after`" (`after` is `None` for the first window). The
/// concrete encoding — including the reference range's end key, inclusive
/// flags, and direction — is a codec concern and out of scope for this
/// crate; a caller's `RangeRequestBuilder` closes over that context.
pub trait RangeRequestBuilder: Send {
    fn build(&self, after: Option<&[u8]>, max: u32) -> Vec<Vec<u8>>;
}

/// Decodes a Range response's body and value into the flat list of keys it
/// carries, in order.
pub trait RangeResponseDecoder: Send {
    fn decode(&self, body: &[u8], value: &[u8]) -> Result<Vec<Vec<u8>>>;
}

/// Iterates over a key range one key at a time, fetching a new window from
/// the server whenever the current one runs out (spec.md §4.11).
///
/// Tracks the caller's overall requested `count` independently of how many
/// keys the server actually holds: once that many keys have been returned,
/// `next` yields `None` even if the server would have more to give (spec.md
/// §4.11, "if the caller's overall count is reached, return null").
pub struct RangeIterator {
    descriptor: SessionDescriptor,
    builder: Box<dyn RangeRequestBuilder>,
    decoder: Box<dyn RangeResponseDecoder>,
    window: VecDeque<Vec<u8>>,
    max_per_request: u32,
    /// Keys still owed to the caller. `None` means "unbounded: keep fetching
    /// until the server returns a short window".
    remaining: Option<u32>,
    last_key: Option<Vec<u8>>,
    /// True once a window came back short of what was asked for, meaning the
    /// server has no more keys in range.
    server_exhausted: bool,
    timeout: Duration,
}

impl RangeIterator {
    /// `max_per_request` is the server's advertised per-request key cap
    /// (spec.md §3, "max keys per range"); `count` is the caller's own
    /// requested total, or `None` to iterate until the server runs dry.
    pub fn new(
        descriptor: SessionDescriptor,
        builder: Box<dyn RangeRequestBuilder>,
        decoder: Box<dyn RangeResponseDecoder>,
        max_per_request: u32,
        count: Option<u32>,
        timeout: Duration,
    ) -> RangeIterator {
        RangeIterator {
            descriptor,
            builder,
            decoder,
            window: VecDeque::new(),
            max_per_request,
            remaining: count,
            last_key: None,
            server_exhausted: false,
            timeout,
        }
    }

    /// Remaining keys the caller has not yet been handed, if bounded.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// Submit a Range request for the next window and wait for its own
    /// reply, reaping it by `OperationId` so a concurrently-completing
    /// Operation on the same session is never mistaken for — or discarded
    /// in place of — this iterator's own reply (spec.md §4.11; §4.7,
    /// "reap(operation)").
    fn fetch_window(&mut self) -> Result<()> {
        let want = match self.remaining {
            Some(r) => r.min(self.max_per_request),
            None => self.max_per_request,
        };
        if want == 0 {
            self.server_exhausted = true;
            return Ok(());
        }

        let send_msg = self.builder.build(self.last_key.as_deref(), want);
        let id = api::submit(
            self.descriptor,
            RpcKind::Range,
            ExchangeKind::RequestResponse,
            false,
            send_msg,
            None,
        )?;

        loop {
            api::poll(self.descriptor, self.timeout)?;
            let op = match api::reap(self.descriptor, id) {
                Ok(op) => op,
                Err(Error::NotReady) => {
                    if api::state(self.descriptor)? != crate::session::SessionState::Connected {
                        return Err(Error::ConnectionAborted);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let recv = op
                .recv_msg
                .ok_or(Error::ProtocolViolation("range reply carried no message"))?;
            let keys = self.decoder.decode(&recv.body, &recv.value)?;
            self.server_exhausted = (keys.len() as u32) < want;
            if let Some(last) = keys.last() {
                // Flattened to a single-fragment buffer before becoming the
                // next window's exclusive start (spec.md §4.11, "Key
                // identity"): `keys` are already owned `Vec<u8>`s, not
                // pointers into the just-freed response buffer, so no
                // flattening step is needed here beyond the clone.
                self.last_key = Some(last.clone());
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining = remaining.saturating_sub(keys.len() as u32);
            }
            self.window.extend(keys);
            return Ok(());
        }
    }

    /// Return the next key in the range, fetching a new window if the
    /// current one is empty. `Ok(None)` once the caller's requested count is
    /// reached or the server has no more keys in range, whichever comes
    /// first.
    pub fn next(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(key) = self.window.pop_front() {
            return Ok(Some(key));
        }
        if self.server_exhausted || self.remaining == Some(0) {
            return Ok(None);
        }
        self.fetch_window()?;
        Ok(self.window.pop_front())
    }
}

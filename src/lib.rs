//! A client-side Transport Layer Interface (TLI) for the Kinetic key-value
//! storage network protocol: authenticated TCP/TLS sessions, framed and
//! sequenced request/response multiplexing over a three-queue producer/
//! consumer pipeline, per-Operation timeouts, running operational
//! statistics, a typed-buffer lifecycle helper, and a range iterator.
//!
//! This crate owns the transport and session-management layer only. The
//! RPC body codec (how a `Get`/`Put`/`Delete`/... command is encoded into
//! bytes), the concrete command adapters, and CLI/shell tooling are out of
//! scope; a caller supplies a [`framing::FramingHelpers`] implementation and
//! drives [`api::submit`]/[`api::poll`]/[`api::reap`] directly.

pub mod aggregate;
pub mod api;
pub mod driver;
pub mod error;
pub mod framing;
pub mod hmac_auth;
pub mod iterator;
pub mod operation;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stats;
pub mod table;

pub use api::{
    close, connect, disconnect, drain, open, poll, reap, reap_unsolicited, record_limits, state,
    stats as session_stats, submit, submit_with_timeout,
};
pub use error::{Error, Result};
pub use operation::{ExchangeKind, Operation, OperationFlags, OperationId, RpcKind};
pub use session::{ServerLimits, SessionConfig, SessionState};
pub use table::SessionDescriptor;

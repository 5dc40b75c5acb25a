use std::fmt;
use std::io;

/// Abstract error taxonomy for the transport layer (spec.md §7).
#[derive(Debug)]
pub enum Error {
    /// Session descriptor does not name a live slot.
    InvalidHandle,
    /// The operation requires a different session state.
    InvalidState(&'static str),
    /// Null or structurally malformed input.
    InvalidArgument(&'static str),
    /// Session table full at open.
    Exhausted,
    /// Address resolution or TCP/TLS connect returned failure.
    ConnectFailed(io::Error),
    /// A previously healthy session has transitioned to `Aborted`.
    ConnectionAborted,
    /// Driver send or receive returned an underlying error.
    IoFailed(io::Error),
    /// Reap called before the Operation has reached the completion queue.
    NotReady,
    /// Poll exceeded the caller's timeout, or an Operation's deadline expired.
    Timeout,
    /// Framing header magic mismatch, bad declared length, or length mismatch.
    ProtocolViolation(&'static str),
    /// Allocation failed in a non-recoverable spot.
    OutOfMemory,
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidHandle => write!(f, "invalid session handle"),
            Error::InvalidState(ctx) => write!(f, "invalid session state: {}", ctx),
            Error::InvalidArgument(ctx) => write!(f, "invalid argument: {}", ctx),
            Error::Exhausted => write!(f, "session table exhausted"),
            Error::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            Error::ConnectionAborted => write!(f, "connection aborted"),
            Error::IoFailed(e) => write!(f, "io failed: {}", e),
            Error::NotReady => write!(f, "operation not yet available"),
            Error::Timeout => write!(f, "timed out"),
            Error::ProtocolViolation(ctx) => write!(f, "protocol violation: {}", ctx),
            Error::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoFailed(e)
    }
}

//! The unit of work that flows through a session (spec.md §3, "Operation").

use std::any::Any;
use std::time::Instant;

/// Which RPC this Operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcKind {
    Get,
    Put,
    Delete,
    GetLog,
    Range,
    BatchStart,
    BatchCommit,
    BatchAbort,
    Noop,
    Flush,
    PinOp,
    Exec,
    FirmwareUpgrade,
}

/// Total number of `RpcKind` variants, used to size fixed per-kind arrays.
pub const RPC_KIND_COUNT: usize = 13;

impl RpcKind {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Request/response shape flags (spec.md §3). Request-only and
/// request-response are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    RequestResponse,
    RequestOnly,
    /// Unsolicited inbound message with no originating request.
    ResponseOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct OperationFlags {
    pub exchange: ExchangeKind,
    pub collect_timestamps: bool,
}

/// Lifecycle state of an Operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    New,
    Sent,
    Received,
    Failed,
    TimedOut,
}

/// Which of the three per-session queues (if any) an Operation sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueId {
    Send,
    Receive,
    Completion,
}

/// A self-validating tagged index into a queue: `(which queue, position
/// token)`. Per spec.md §9 REDESIGN FLAGS, this replaces a raw back-pointer
/// so a stale reference can never be dereferenced — it can only fail an
/// equality check against the queue's current bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBackref {
    pub queue: QueueId,
}

/// Timestamps collected across an Operation's lifetime, when
/// `collect_timestamps` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps {
    pub start: Option<Instant>,
    pub after_send: Option<Instant>,
    pub before_receive: Option<Instant>,
    pub complete: Option<Instant>,
}

/// Decoded inbound message: framing header, body, and value as three gather
/// slots (spec.md §3).
#[derive(Debug, Default, Clone)]
pub struct RecvMessage {
    pub header: Vec<u8>,
    pub body: Vec<u8>,
    pub value: Vec<u8>,
}

/// Opaque arena index identifying an Operation within a session.
pub type OperationId = usize;

/// The lifecycle record for one request/response exchange (spec.md §3).
pub struct Operation {
    /// This Operation's own arena index, stamped in right after
    /// `OperationArena::insert` so a caller juggling several in-flight
    /// Operations can recognize one among whatever the completion queue
    /// hands back (reap order need not match submit order).
    pub id: OperationId,
    pub kind: RpcKind,
    pub seq: u64,
    pub flags: OperationFlags,
    pub state: OperationState,

    /// Ordered gather vector: `[framing_header, body, value]`. Owned by the
    /// submitter before submit, by the core from submit until reap.
    pub send_msg: Vec<Vec<u8>>,

    /// Populated by the receiver on arrival.
    pub recv_msg: Option<RecvMessage>,

    pub deadline: Option<Instant>,

    /// Overrides the session's default per-Operation timeout when set
    /// (spec.md §8, end-to-end scenario 3). `None` means "use
    /// `Session::timeout()`".
    pub timeout_override: Option<std::time::Duration>,

    /// Current queue membership, if any (spec.md invariant 2).
    pub queue_backref: Option<QueueBackref>,

    /// Opaque caller context; the core never inspects it.
    pub caller_context: Option<Box<dyn Any + Send>>,

    pub timestamps: Timestamps,

    /// Error recorded at terminal state (`Failed`/`TimedOut`), if any.
    pub error: Option<crate::error::Error>,
}

impl Operation {
    pub fn new(kind: RpcKind, flags: OperationFlags, send_msg: Vec<Vec<u8>>) -> Operation {
        let mut timestamps = Timestamps::default();
        if flags.collect_timestamps {
            timestamps.start = Some(Instant::now());
        }
        Operation {
            id: 0,
            kind,
            seq: 0,
            flags,
            state: OperationState::New,
            send_msg,
            recv_msg: None,
            deadline: None,
            timeout_override: None,
            queue_backref: None,
            caller_context: None,
            timestamps,
            error: None,
        }
    }

    /// Total bytes the send_msg gather vector spans.
    pub fn send_len(&self) -> usize {
        self.send_msg.iter().map(Vec::len).sum()
    }
}

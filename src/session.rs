//! Session: the connected pair of endpoints sharing a framing, sequencing,
//! and authentication context (spec.md §3).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

use crate::driver::Driver;
use crate::error::Error;
use crate::framing::FramingHelpers;
use crate::hmac_auth::Authenticator;
use crate::operation::{OperationState, QueueBackref, QueueId};
use crate::queue::{OperationArena, Queue};
use crate::stats::Stats;

/// Default per-Operation timeout (spec.md §4.5, §6).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Initial sequence number for a freshly opened session (spec.md §8,
/// Invariant 1).
pub const INITIAL_SEQUENCE: u64 = 100;

/// Default session table capacity (spec.md §4.2).
pub const DEFAULT_TABLE_CAPACITY: usize = 1024;

/// Five session states and their legal transitions (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    Opened,
    Connected,
    Aborted,
    Draining,
}

/// Configuration supplied to the core at open time (spec.md §6).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub identity: i64,
    pub secret: Vec<u8>,
    /// -1 means "not yet known" (spec.md §6).
    pub cluster_version: i64,
    pub timeout_secs: u64,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16, identity: i64, secret: Vec<u8>) -> Self {
        SessionConfig {
            host: host.into(),
            port,
            use_tls: false,
            identity,
            secret,
            cluster_version: -1,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Server-advertised limits, cached after the unsolicited first-connect
/// message is decoded by the higher layer (spec.md §3; see SPEC_FULL.md
/// §4.10 for why this crate only caches rather than parses them).
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerLimits {
    pub max_key_len: u32,
    pub max_value_len: u32,
    pub max_version_len: u32,
    pub max_checksum_len: u32,
    pub max_message_len: u32,
    pub max_batch_size: u32,
    pub max_batch_ops: u32,
    pub max_batch_deletes: u32,
    pub max_active_batches: u32,
    pub max_pending_reads: u32,
    pub max_pending_writes: u32,
    pub max_connections: u32,
    pub max_identities: u32,
    pub max_keys_per_range: u32,
}

/// A live session: driver, framing helpers, authenticator, queues, and
/// bookkeeping (spec.md §3). One sender task and one receiver task run
/// against a session while it is `Connected`.
pub struct Session {
    pub driver: Mutex<Box<dyn Driver>>,
    pub framing: Box<dyn FramingHelpers>,
    pub authenticator: Box<dyn Authenticator>,
    pub config: SessionConfig,

    pub state: Mutex<SessionState>,
    /// Set once by `close()` or the receiver's fatal-error path; the
    /// receiver task polls this each loop iteration since, unlike the
    /// sender, it is never parked on a queue condvar (it is parked in
    /// `Driver::poll`).
    pub stopping: AtomicBool,
    pub next_sequence: AtomicU64,
    pub next_batch_id: AtomicU64,
    pub active_batch_count: AtomicUsize,

    pub send_queue: Queue,
    pub receive_queue: Queue,
    pub completion_queue: Queue,
    pub arena: OperationArena,

    pub stats: Mutex<Stats>,
    pub limits: Mutex<Option<ServerLimits>>,

    pub sender_handle: Mutex<Option<JoinHandle<()>>>,
    pub receiver_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        driver: Box<dyn Driver>,
        framing: Box<dyn FramingHelpers>,
        authenticator: Box<dyn Authenticator>,
        config: SessionConfig,
    ) -> Session {
        Session {
            driver: Mutex::new(driver),
            framing,
            authenticator,
            config,
            state: Mutex::new(SessionState::Opened),
            stopping: AtomicBool::new(false),
            next_sequence: AtomicU64::new(INITIAL_SEQUENCE),
            next_batch_id: AtomicU64::new(1),
            active_batch_count: AtomicUsize::new(0),
            send_queue: Queue::new(),
            receive_queue: Queue::new(),
            completion_queue: Queue::new(),
            arena: OperationArena::new(),
            stats: Mutex::new(Stats::new()),
            limits: Mutex::new(None),
            sender_handle: Mutex::new(None),
            receiver_handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Record server-advertised limits decoded by the higher layer from the
    /// unsolicited first-connect message (SPEC_FULL.md §4.10).
    pub fn record_limits(&self, limits: ServerLimits) {
        *self.limits.lock().unwrap() = Some(limits);
    }

    pub fn limits(&self) -> Option<ServerLimits> {
        *self.limits.lock().unwrap()
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.timeout_secs)
    }

    pub fn should_stop(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Wake the sender and receiver tasks and tell them to exit.
    pub fn signal_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.send_queue.signal_exit();
        self.receive_queue.signal_exit();
        self.completion_queue.signal_exit();
    }

    /// Acquire all three queue locks in the fixed order `send -> receive ->
    /// completion` (spec.md §5, "Lock order"). Only the receiver's
    /// fatal-error path needs all three at once.
    pub fn queues_in_order(&self) -> (&Queue, &Queue, &Queue) {
        (&self.send_queue, &self.receive_queue, &self.completion_queue)
    }

    /// Move every Operation still on the send and receive queues to the
    /// completion queue, marked `Failed` with `ConnectionAborted` (spec.md
    /// §7: "Propagation policy"; §4.7: "disconnect is the bulk-cancellation
    /// primitive"). Shared by the receiver's fatal-error path and an
    /// explicit `api::disconnect`. Lock order is send -> receive ->
    /// completion (spec.md §5).
    pub fn fail_pending_to_completion(&self) {
        let (send_q, recv_q, _completion_q) = self.queues_in_order();
        let mut stranded = send_q.take_all_matching(|_| true);
        stranded.extend(recv_q.take_all_matching(|_| true));

        for id in stranded {
            let kind = self.arena.with(id, |op| {
                op.state = OperationState::Failed;
                op.error = Some(Error::ConnectionAborted);
                op.queue_backref = Some(QueueBackref {
                    queue: QueueId::Completion,
                });
                op.kind
            });
            self.stats.lock().unwrap().record_err(kind);
            self.completion_queue.push_back(id);
        }
    }

    /// True once none of the three queues hold any Operation (spec.md §3,
    /// "Draining -> Opened occurs exactly when all three queues are
    /// empty").
    pub fn all_queues_empty(&self) -> bool {
        self.send_queue.is_empty() && self.receive_queue.is_empty() && self.completion_queue.is_empty()
    }
}

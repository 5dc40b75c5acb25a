//! Receiver Task (spec.md §4.6): polls the driver for inbound frames,
//! matches replies to outstanding Operations, and sweeps expired deadlines.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::driver::PollOutcome;
use crate::error::Error;
use crate::framing::MAX_LEN;
use crate::operation::{
    ExchangeKind, Operation, OperationFlags, OperationState, QueueBackref, QueueId, RecvMessage,
    RpcKind,
};
use crate::session::{Session, SessionState};

/// How long each `poll` call blocks before the receiver re-checks for exit
/// and reconsiders a deadline sweep (spec.md §4.6).
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Deadline sweeps run no more than once per second (spec.md §4.6).
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub fn run(session: Arc<Session>) {
    let mut last_sweep = Instant::now();
    loop {
        if session.should_stop() {
            return;
        }

        let outcome = session.driver.lock().unwrap().poll(POLL_INTERVAL);
        match outcome {
            Ok(PollOutcome::DataReady) => {
                if let Err(e) = receive_one(&session) {
                    fatal(&session, e);
                    return;
                }
            }
            Ok(PollOutcome::Timeout) => {}
            Ok(PollOutcome::Disconnected) => {
                fatal(&session, Error::ConnectionAborted);
                return;
            }
            Err(e) => {
                fatal(&session, e);
                return;
            }
        }

        if last_sweep.elapsed() >= SWEEP_INTERVAL {
            sweep_deadlines(&session);
            last_sweep = Instant::now();
        }
    }
}

/// Zero-filled buffer of `len` bytes, or `Error::OutOfMemory` if the
/// reservation fails (spec.md §7, `OutOfMemory`: "allocation failed in a
/// non-recoverable spot"). `len` is always bound to `MAX_LEN` (1 MiB) by the
/// caller before this runs, so this guards genuine allocator exhaustion, not
/// an oversized declared length.
fn try_alloc_zeroed(len: usize) -> crate::error::Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Read one framed message: fixed-length header, then body and value sized
/// from the header's declared lengths. Matches it to the Operation awaiting
/// that ack sequence, or synthesizes a response-only Operation for an
/// unsolicited message (spec.md §8, end-to-end scenario 5).
fn receive_one(session: &Session) -> crate::error::Result<()> {
    let header_len = session.framing.header_len();
    let header = {
        let mut gather = vec![try_alloc_zeroed(header_len)?];
        session.driver.lock().unwrap().receive(&mut gather)?;
        gather.pop().unwrap()
    };

    let body_len = session
        .framing
        .body_len(&header)
        .ok_or(Error::ProtocolViolation("malformed framing header"))?;
    let value_len = session
        .framing
        .value_len(&header)
        .ok_or(Error::ProtocolViolation("malformed framing header"))?;
    if body_len > MAX_LEN || value_len > MAX_LEN {
        return Err(Error::ProtocolViolation("declared length exceeds 1 MiB"));
    }

    // If `receive` fails partway through, `body`/`value` are simply dropped
    // here: there is no separate free step, since nothing outside this
    // function ever observes the partially-filled buffers.
    let (body, value) = {
        let mut gather = vec![
            try_alloc_zeroed(body_len as usize)?,
            try_alloc_zeroed(value_len as usize)?,
        ];
        session.driver.lock().unwrap().receive(&mut gather)?;
        let value = gather.pop().unwrap();
        let body = gather.pop().unwrap();
        (body, value)
    };

    let ack_seq = session
        .framing
        .extract_ack_sequence(&[header.clone(), body.clone()]);
    let recv = RecvMessage { header, body, value };

    let matched = session
        .receive_queue
        .remove_where(|id| session.arena.with(id, |op| op.seq == ack_seq));

    match matched {
        Some(id) => {
            let (kind, send_size, receive_size, value_len, timed, timestamps) =
                session.arena.with(id, |op| {
                    op.recv_msg = Some(recv);
                    op.state = OperationState::Received;
                    op.queue_backref = Some(QueueBackref {
                        queue: QueueId::Completion,
                    });
                    let now = Instant::now();
                    if op.flags.collect_timestamps {
                        op.timestamps.before_receive = Some(now);
                        op.timestamps.complete = Some(now);
                    }
                    let recv_msg = op.recv_msg.as_ref();
                    let receive_size = recv_msg
                        .map(|m| m.header.len() + m.body.len() + m.value.len())
                        .unwrap_or(0);
                    let value_len = recv_msg.map(|m| m.value.len()).unwrap_or(0);
                    (
                        op.kind,
                        op.send_len(),
                        receive_size,
                        value_len,
                        op.flags.collect_timestamps,
                        op.timestamps,
                    )
                });
            session.completion_queue.push_back(id);

            let mut stats = session.stats.lock().unwrap();
            stats.record_ok(kind, send_size, receive_size);
            // Key length has no counterpart here: the core only ever sees an
            // opaque encoded body (spec.md §1, "the core treats each
            // request/response as an opaque byte payload"); the key itself
            // lives inside that body and is meaningless to this crate without
            // the codec it deliberately excludes (see DESIGN.md).
            stats.record_value_length(kind, value_len);
            if timed {
                if let (Some(start), Some(after_send), Some(complete)) =
                    (timestamps.start, timestamps.after_send, timestamps.complete)
                {
                    stats.record_total_latency(kind, complete.duration_since(start));
                    stats.record_request_latency(kind, after_send.duration_since(start));
                    stats.record_response_latency(kind, complete.duration_since(after_send));
                }
            }
            debug!("kinetic-tli: matched reply seq={} op={}", ack_seq, id);
        }
        None => {
            warn!("kinetic-tli: unsolicited message, ack_seq={}", ack_seq);
            let mut op = Operation::new(
                RpcKind::GetLog,
                OperationFlags {
                    exchange: ExchangeKind::ResponseOnly,
                    collect_timestamps: false,
                },
                Vec::new(),
            );
            op.recv_msg = Some(recv);
            op.state = OperationState::Received;
            let id = session.arena.insert(op);
            session.arena.with(id, |op| {
                op.id = id;
                op.queue_backref = Some(QueueBackref {
                    queue: QueueId::Completion,
                });
            });
            session.completion_queue.push_back(id);
        }
    }

    Ok(())
}

/// Fail every Operation on the send and receive queues with
/// `ConnectionAborted` and drive the session to `Aborted` (spec.md §7,
/// "Propagation policy"). Lock order follows spec.md §5: send before
/// receive before completion.
fn fatal(session: &Session, cause: Error) {
    error!("kinetic-tli: session fatal: {}", cause);
    session.set_state(SessionState::Aborted);
    session.fail_pending_to_completion();

    // spec.md §4.6 step 1: "set state to Aborted, call disconnect". The
    // driver may already be half- or fully closed on this path; a failing
    // disconnect here is not itself fatal, since the session is already
    // being torn down.
    let _ = session.driver.lock().unwrap().disconnect();

    session.signal_stop();
}

/// Move every Operation on the receive queue whose deadline has passed to
/// the completion queue as `TimedOut`. Runs at most once per
/// `SWEEP_INTERVAL`.
fn sweep_deadlines(session: &Session) {
    let now = Instant::now();
    let expired = session
        .receive_queue
        .take_all_matching(|id| session.arena.with(id, |op| op.deadline.map_or(false, |d| now >= d)));

    for id in expired {
        let kind = session.arena.with(id, |op| {
            op.state = OperationState::TimedOut;
            op.error = Some(Error::Timeout);
            op.queue_backref = Some(QueueBackref {
                queue: QueueId::Completion,
            });
            op.kind
        });
        warn!("kinetic-tli: operation {} timed out", id);
        session.stats.lock().unwrap().record_err(kind);
        session.completion_queue.push_back(id);
    }
}

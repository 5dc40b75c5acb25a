//! Sender Task (spec.md §4.5): dequeues Operations from the send queue,
//! stamps sequence + authentication tag, and hands them to the driver.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};

use crate::error::Error;
use crate::hmac_auth::TAG_LEN;
use crate::operation::{ExchangeKind, OperationState, QueueBackref, QueueId};
use crate::session::Session;

/// Run the sender loop until the send queue is told to exit. Intended to be
/// spawned on its own thread by `Session::connect` (spec.md §5: "Each
/// session owns exactly two dedicated tasks").
pub fn run(session: Arc<Session>) {
    loop {
        session.send_queue.wait_non_empty();
        if session.send_queue.is_exiting() {
            return;
        }

        while let Some(id) = session.send_queue.pop_front() {
            send_one(&session, id);
        }
    }
}

fn send_one(session: &Session, id: crate::operation::OperationId) {
    let seq = session.next_sequence.fetch_add(1, Ordering::SeqCst);

    let (exchange, timed) = session.arena.with(id, |op| {
        op.seq = seq;
        session.framing.set_sequence(&mut op.send_msg, seq);
        stamp_auth_tag(session, op);
        (op.flags.exchange, op.flags.collect_timestamps)
    });

    if exchange == ExchangeKind::RequestResponse {
        // Pre-emptively enqueue on the receive queue before sending, so an
        // early reply can never race ahead of this bookkeeping (spec.md
        // §4.5).
        session.arena.with(id, |op| {
            op.queue_backref = Some(QueueBackref {
                queue: QueueId::Receive,
            });
            let timeout = op.timeout_override.unwrap_or_else(|| session.timeout());
            op.deadline = Some(Instant::now() + timeout);
        });
        session.receive_queue.push_back(id);
    } else {
        session.arena.with(id, |op| {
            let timeout = op.timeout_override.unwrap_or_else(|| session.timeout());
            op.deadline = Some(Instant::now() + timeout);
        });
    }

    let send_result = {
        let mut driver = session.driver.lock().unwrap();
        let gather = session.arena.with(id, |op| op.send_msg.clone());
        driver.send(&gather)
    };

    match send_result {
        Ok(_) => {
            session.arena.with(id, |op| {
                op.state = OperationState::Sent;
                if timed {
                    op.timestamps.after_send = Some(Instant::now());
                }
            });
            debug!("kinetic-tli: sent seq={}", seq);

            if exchange != ExchangeKind::RequestResponse {
                // request-only: no reply expected, complete immediately.
                session.arena.with(id, |op| {
                    op.state = OperationState::Received;
                    op.queue_backref = Some(QueueBackref {
                        queue: QueueId::Completion,
                    });
                });
                session.completion_queue.push_back(id);
                session.completion_queue.notify_all();
            }
        }
        Err(e) => {
            warn!("kinetic-tli: send failed for seq={}: {}", seq, e);
            if exchange == ExchangeKind::RequestResponse {
                session.receive_queue.remove(id);
            }
            session.arena.with(id, |op| {
                op.state = OperationState::Failed;
                op.error = Some(match e {
                    Error::IoFailed(io) => Error::IoFailed(io),
                    other => other,
                });
                op.queue_backref = Some(QueueBackref {
                    queue: QueueId::Completion,
                });
            });
            session.completion_queue.push_back(id);
            session.completion_queue.notify_all();
        }
    }

    // A send failure here is terminal for this one Operation only. The
    // receiver task is responsible for observing connection-fatal errors via
    // `poll`/`receive` and driving the session to `Aborted`; the sender
    // never flips session state itself (spec.md §7).
}

/// Overwrite the trailing `TAG_LEN` bytes of the body with the HMAC tag
/// computed over the rest of the body (spec.md §9 design note: "the body's
/// trailing authentication-tag field [is] at a known offset").
fn stamp_auth_tag(session: &Session, op: &mut crate::operation::Operation) {
    if op.send_msg.len() < 2 {
        return;
    }
    let body = &mut op.send_msg[1];
    if body.len() < TAG_LEN {
        return;
    }
    let split = body.len() - TAG_LEN;
    let tag = session.authenticator.tag(&body[..split]);
    body[split..].copy_from_slice(&tag);
}

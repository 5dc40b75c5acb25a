//! Public submit / poll / reap / drain surface (spec.md §4.7) plus session
//! lifecycle (open, connect, and close).

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::driver::{Driver, StreamDriver};
use crate::error::{Error, Result};
use crate::framing::FramingHelpers;
use crate::hmac_auth::{Authenticator, HmacSha1Authenticator};
use crate::operation::{
    ExchangeKind, Operation, OperationFlags, OperationId, QueueBackref, QueueId, RpcKind,
};
use crate::session::{Session, SessionConfig, SessionState};
use crate::stats::Stats;
use crate::table::{SessionDescriptor, TABLE};
use crate::{receiver, sender};

/// Open a session: allocate the driver and claim a slot in the process-wide
/// session table, but perform no I/O (spec.md §3, `Opened`: "connected-ready;
/// no live socket. Only `connect` or `close` legal."). The returned
/// descriptor names a session in state `Opened`; call [`connect`] to dial the
/// peer and start the sender/receiver tasks.
pub fn open(config: SessionConfig, framing: Box<dyn FramingHelpers>) -> Result<SessionDescriptor> {
    let authenticator: Box<dyn Authenticator> =
        Box::new(HmacSha1Authenticator::new(config.secret.clone()));

    let driver = StreamDriver::open();
    let session = Arc::new(Session::new(
        Box::new(driver),
        framing,
        authenticator,
        config,
    ));

    let descriptor = TABLE.allocate_slot(session)?;
    info!("kinetic-tli: session {} opened", descriptor);
    Ok(descriptor)
}

/// Dial the peer named by the session's config, then spawn the sender and
/// receiver tasks and transition to `Connected` (spec.md §4.7, "connect";
/// §3: legal only from `Opened`). A failed dial leaves the session in
/// `Opened` so the caller may retry or `close` it.
pub fn connect(descriptor: SessionDescriptor) -> Result<()> {
    let session = TABLE.get(descriptor)?;
    if session.state() != SessionState::Opened {
        return Err(Error::InvalidState("connect requires session Opened"));
    }

    {
        let mut driver = session.driver.lock().unwrap();
        driver.connect(
            &session.config.host,
            session.config.port,
            session.config.use_tls,
        )?;
    }
    session.set_state(SessionState::Connected);

    let sender_session = Arc::clone(&session);
    let receiver_session = Arc::clone(&session);
    let sender_handle = std::thread::spawn(move || sender::run(sender_session));
    let receiver_handle = std::thread::spawn(move || receiver::run(receiver_session));
    *session.sender_handle.lock().unwrap() = Some(sender_handle);
    *session.receiver_handle.lock().unwrap() = Some(receiver_handle);

    info!("kinetic-tli: session {} connected", descriptor);
    Ok(())
}

/// Submit an Operation for the sender task to pick up. Returns the
/// `OperationId` the caller can use to recognize this Operation when it is
/// later reaped (spec.md §4.7, "submit").
pub fn submit(
    descriptor: SessionDescriptor,
    kind: RpcKind,
    exchange: ExchangeKind,
    collect_timestamps: bool,
    send_msg: Vec<Vec<u8>>,
    caller_context: Option<Box<dyn Any + Send>>,
) -> Result<OperationId> {
    submit_with_timeout(
        descriptor,
        kind,
        exchange,
        collect_timestamps,
        send_msg,
        caller_context,
        None,
    )
}

/// As [`submit`], but overrides the session's default 30s per-Operation
/// deadline (spec.md §6, §8 end-to-end scenario 3: "stamp `deadline = now +
/// 100 ms` (override the default for the test)").
pub fn submit_with_timeout(
    descriptor: SessionDescriptor,
    kind: RpcKind,
    exchange: ExchangeKind,
    collect_timestamps: bool,
    send_msg: Vec<Vec<u8>>,
    caller_context: Option<Box<dyn Any + Send>>,
    timeout_override: Option<Duration>,
) -> Result<OperationId> {
    let session = TABLE.get(descriptor)?;
    if session.state() != SessionState::Connected {
        return Err(Error::InvalidState("session is not connected"));
    }
    if send_msg.is_empty() {
        return Err(Error::InvalidArgument("send_msg must not be empty"));
    }

    let flags = OperationFlags {
        exchange,
        collect_timestamps,
    };
    let mut op = Operation::new(kind, flags, send_msg);
    op.caller_context = caller_context;
    op.timeout_override = timeout_override;
    let id = session.arena.insert(op);
    session.arena.with(id, |op| {
        op.id = id;
        op.queue_backref = Some(QueueBackref {
            queue: QueueId::Send,
        });
    });
    session.send_queue.push_back(id);
    Ok(id)
}

/// Block up to `timeout` for at least one Operation to complete. Returns
/// whether the completion queue is non-empty when this returns (spec.md
/// §4.7, "poll").
pub fn poll(descriptor: SessionDescriptor, timeout: Duration) -> Result<bool> {
    let session = TABLE.get(descriptor)?;
    Ok(session.completion_queue.wait_non_empty_timeout(timeout))
}

/// Reap a specific Operation by identity (spec.md §4.7, "reap"):
/// `Error::NotReady` if `operation` has not yet reached the completion
/// queue. Legal while `Connected`, `Aborted` (an aborted session's failed
/// Operations are still individually reapable — see DESIGN.md, "reap during
/// Aborted"), or `Draining` (delegates to [`drain`]).
pub fn reap(descriptor: SessionDescriptor, operation: OperationId) -> Result<Operation> {
    let session = TABLE.get(descriptor)?;
    match session.state() {
        SessionState::Draining => drain(descriptor, Some(operation)),
        SessionState::Connected | SessionState::Aborted => {
            if session.completion_queue.remove(operation) {
                Ok(session.arena.take(operation))
            } else {
                Err(Error::NotReady)
            }
        }
        _ => Err(Error::InvalidState(
            "reap requires session Connected, Aborted, or Draining",
        )),
    }
}

/// Drain one Operation while the session is `Draining` (spec.md §4.7,
/// "drain"). If `operation` is named, it is searched for in the completion,
/// then receive, then send queue, in that order; anything found outside the
/// completion queue is marked `Failed` with `ConnectionAborted` since it
/// never actually completed. If `operation` is `None`, any one Operation is
/// popped (completion queue preferred). Returns `Error::NotReady` if nothing
/// matches. Once all three queues are empty the session returns to `Opened`
/// (spec.md §3).
pub fn drain(descriptor: SessionDescriptor, operation: Option<OperationId>) -> Result<Operation> {
    let session = TABLE.get(descriptor)?;
    if session.state() != SessionState::Draining {
        return Err(Error::InvalidState("drain requires session Draining"));
    }

    let id = take_from_any_queue(&session, operation).ok_or(Error::NotReady)?;
    session.arena.with(id, |op| {
        if op.state != crate::operation::OperationState::Received {
            op.state = crate::operation::OperationState::Failed;
            if op.error.is_none() {
                op.error = Some(Error::ConnectionAborted);
            }
        }
    });
    let op = session.arena.take(id);

    if session.all_queues_empty() {
        session.set_state(SessionState::Opened);
        info!("kinetic-tli: session {} drained back to Opened", descriptor);
    }
    Ok(op)
}

/// Reap the first unsolicited (`ExchangeKind::ResponseOnly`) completion
/// without knowing its `OperationId` in advance (spec.md §4.6, "the core
/// routes the peer's unsolicited first-connect message to the completion
/// queue with `response-only` set"; §8 end-to-end scenario 5, "reapable via
/// the unsolicited-reap variant"). `Error::NotReady` if no such completion is
/// waiting yet. Legal in the same states as [`reap`].
pub fn reap_unsolicited(descriptor: SessionDescriptor) -> Result<Operation> {
    let session = TABLE.get(descriptor)?;
    match session.state() {
        SessionState::Connected | SessionState::Aborted | SessionState::Draining => {}
        _ => {
            return Err(Error::InvalidState(
                "reap_unsolicited requires session Connected, Aborted, or Draining",
            ))
        }
    }

    let id = session
        .completion_queue
        .remove_where(|id| session.arena.with(id, |op| op.flags.exchange == ExchangeKind::ResponseOnly))
        .ok_or(Error::NotReady)?;
    let op = session.arena.take(id);

    if session.state() == SessionState::Draining && session.all_queues_empty() {
        session.set_state(SessionState::Opened);
        info!("kinetic-tli: session {} drained back to Opened", descriptor);
    }
    Ok(op)
}

fn take_from_any_queue(session: &Session, operation: Option<OperationId>) -> Option<OperationId> {
    match operation {
        Some(id) => {
            if session.completion_queue.remove(id) {
                Some(id)
            } else if session.receive_queue.remove(id) {
                Some(id)
            } else if session.send_queue.remove(id) {
                Some(id)
            } else {
                None
            }
        }
        None => session
            .completion_queue
            .pop_front()
            .or_else(|| session.receive_queue.pop_front())
            .or_else(|| session.send_queue.pop_front()),
    }
}

/// The bulk-cancellation primitive (spec.md §4.7, §7): fails every pending
/// Operation with `ConnectionAborted` and moves the session to `Draining`.
/// Legal from `Connected` (stops the sender/receiver tasks and disconnects
/// the driver) or `Aborted` (the tasks have already stopped and the pending
/// Operations are already failed; this just completes the transition).
pub fn disconnect(descriptor: SessionDescriptor) -> Result<()> {
    let session = TABLE.get(descriptor)?;
    match session.state() {
        SessionState::Connected => {
            session.signal_stop();
            if let Some(handle) = session.sender_handle.lock().unwrap().take() {
                let _ = handle.join();
            }
            if let Some(handle) = session.receiver_handle.lock().unwrap().take() {
                let _ = handle.join();
            }
            session.fail_pending_to_completion();
            {
                let mut driver = session.driver.lock().unwrap();
                let _ = driver.disconnect();
            }
            session.set_state(SessionState::Draining);
            info!("kinetic-tli: session {} disconnected", descriptor);
            Ok(())
        }
        SessionState::Aborted => {
            session.set_state(SessionState::Draining);
            Ok(())
        }
        _ => Err(Error::InvalidState(
            "disconnect requires session Connected or Aborted",
        )),
    }
}

/// Record server-advertised limits decoded from an unsolicited first-connect
/// message (SPEC_FULL.md §4.10).
pub fn record_limits(
    descriptor: SessionDescriptor,
    limits: crate::session::ServerLimits,
) -> Result<()> {
    let session = TABLE.get(descriptor)?;
    session.record_limits(limits);
    Ok(())
}

/// A snapshot of the session's operational statistics (spec.md §4.9).
pub fn stats(descriptor: SessionDescriptor) -> Result<Stats> {
    let session = TABLE.get(descriptor)?;
    Ok(*session.stats.lock().unwrap())
}

pub fn state(descriptor: SessionDescriptor) -> Result<SessionState> {
    let session = TABLE.get(descriptor)?;
    Ok(session.state())
}

/// Close a session: transitions it to `Unknown` and frees its table slot.
///
/// spec.md's source for this component left `close` unimplemented (DESIGN.md,
/// "close must be a real implementation"); spec.md's state diagram requires
/// `close` to happen from `Opened` (`Draining -> Opened -> Unknown`). A
/// `Connected` or `Aborted` session is walked there automatically — this
/// implicitly disconnects and drains every pending Operation (as
/// `ConnectionAborted`) rather than requiring the caller to sequence
/// `disconnect`/`drain`/`close` by hand for the common "just shut it down"
/// case.
pub fn close(descriptor: SessionDescriptor) -> Result<()> {
    {
        let session = TABLE.get(descriptor)?;
        match session.state() {
            SessionState::Connected | SessionState::Aborted => disconnect(descriptor)?,
            SessionState::Draining | SessionState::Opened => {}
            SessionState::Unknown => return Err(Error::InvalidState("session already closed")),
        }
    }

    loop {
        let session = TABLE.get(descriptor)?;
        if session.state() != SessionState::Draining {
            break;
        }
        if session.all_queues_empty() {
            session.set_state(SessionState::Opened);
            break;
        }
        match drain(descriptor, None) {
            Ok(_) => continue,
            Err(Error::NotReady) => break,
            Err(e) => return Err(e),
        }
    }

    let session = TABLE.free_slot(descriptor)?;
    if let Some(handle) = session.sender_handle.lock().unwrap().take() {
        let _ = handle.join();
    }
    if let Some(handle) = session.receiver_handle.lock().unwrap().take() {
        let _ = handle.join();
    }

    {
        let mut driver = session.driver.lock().unwrap();
        let _ = driver.disconnect();
        driver.close();
    }

    session.set_state(SessionState::Unknown);
    info!("kinetic-tli: session {} closed", descriptor);
    Ok(())
}

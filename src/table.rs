//! Session Table (spec.md §4.2): a process-wide fixed-capacity array of
//! session slots, indexed by a small non-negative session descriptor.
//!
//! spec.md describes slot allocation as "lock-free via compare-and-swap on
//! the slot pointer". A literal `AtomicPtr` CAS over `Arc<Session>` raw
//! pointers is achievable but only sound with careful raw-pointer
//! bookkeeping that buys nothing at this scale (opening/closing a Kinetic
//! session is not a hot-path operation the way a per-packet allocation
//! would be). This crate uses one `Mutex<Option<Arc<Session>>>` per slot
//! instead: `allocate_slot` still scans from index 0 and takes the first
//! slot whose lock it can acquire with a `None` inside, which preserves the
//! "first successful compare-and-swap wins" semantics spec.md calls for,
//! without unsafe pointer lifetime games. See DESIGN.md.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::session::Session;

/// A small, non-negative integer naming a live session slot.
pub type SessionDescriptor = usize;

pub struct SessionTable {
    slots: Vec<Mutex<Option<Arc<Session>>>>,
}

impl SessionTable {
    pub fn with_capacity(capacity: usize) -> SessionTable {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Mutex::new(None));
        SessionTable { slots }
    }

    /// Scan from index 0 and claim the first empty slot.
    pub fn allocate_slot(&self, session: Arc<Session>) -> Result<SessionDescriptor> {
        for (idx, slot) in self.slots.iter().enumerate() {
            let mut guard = slot.lock().unwrap();
            if guard.is_none() {
                *guard = Some(session);
                return Ok(idx);
            }
        }
        Err(Error::Exhausted)
    }

    /// Free `descriptor`, returning the session that occupied it.
    pub fn free_slot(&self, descriptor: SessionDescriptor) -> Result<Arc<Session>> {
        let slot = self.slots.get(descriptor).ok_or(Error::InvalidHandle)?;
        let mut guard = slot.lock().unwrap();
        guard.take().ok_or(Error::InvalidHandle)
    }

    pub fn valid(&self, descriptor: SessionDescriptor) -> bool {
        match self.slots.get(descriptor) {
            Some(slot) => slot.lock().unwrap().is_some(),
            None => false,
        }
    }

    pub fn get(&self, descriptor: SessionDescriptor) -> Result<Arc<Session>> {
        let slot = self.slots.get(descriptor).ok_or(Error::InvalidHandle)?;
        slot.lock().unwrap().clone().ok_or(Error::InvalidHandle)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

lazy_static::lazy_static! {
    /// The single process-wide session table (spec.md §4.2, §9 REDESIGN
    /// FLAGS: "a single long-lived structure initialized once on first
    /// open").
    pub static ref TABLE: SessionTable =
        SessionTable::with_capacity(crate::session::DEFAULT_TABLE_CAPACITY);
}

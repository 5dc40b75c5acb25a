//! Typed-buffer lifecycle helper (spec.md §4.10): a magic-tagged wrapper
//! around a caller payload plus an ordered list of cleanup contexts run in
//! insertion order on `clean`/`destroy`.

use crate::error::{Error, Result};

const MAGIC: u32 = 0x4B54_4C49; // "KTLI"

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateState {
    Live,
    Poisoned,
}

/// One cleanup action registered against a `TypedAggregate`. Per spec.md §9
/// REDESIGN FLAGS, a context is a plain closure and is never given a
/// reference back into the aggregate that owns it, so there is no way to
/// construct a cycle between an aggregate and its own cleanup list.
pub struct CleanupContext {
    name: &'static str,
    run: Box<dyn FnOnce() + Send>,
}

impl CleanupContext {
    pub fn new(name: &'static str, run: impl FnOnce() + Send + 'static) -> CleanupContext {
        CleanupContext {
            name,
            run: Box::new(run),
        }
    }
}

/// Wraps a typed payload with a magic tag, a live/poisoned state, and an
/// ordered cleanup-context list (spec.md §4.10).
pub struct TypedAggregate<T> {
    magic: u32,
    state: AggregateState,
    payload: Option<T>,
    contexts: Vec<CleanupContext>,
}

impl<T> TypedAggregate<T> {
    pub fn create(payload: T) -> TypedAggregate<T> {
        TypedAggregate {
            magic: MAGIC,
            state: AggregateState::Live,
            payload: Some(payload),
            contexts: Vec::new(),
        }
    }

    fn check_live(&self) -> Result<()> {
        if self.magic != MAGIC || self.state == AggregateState::Poisoned {
            return Err(Error::InvalidArgument("aggregate is not live"));
        }
        Ok(())
    }

    /// Register a cleanup context. Contexts run in the order they were
    /// added (spec.md §4.10: "runs each registered destructor in insertion
    /// order").
    pub fn add_context(&mut self, context: CleanupContext) -> Result<()> {
        self.check_live()?;
        self.contexts.push(context);
        Ok(())
    }

    pub fn get(&self) -> Result<&T> {
        self.check_live()?;
        Ok(self
            .payload
            .as_ref()
            .expect("a live aggregate always holds a payload"))
    }

    pub fn get_mut(&mut self) -> Result<&mut T> {
        self.check_live()?;
        Ok(self
            .payload
            .as_mut()
            .expect("a live aggregate always holds a payload"))
    }

    /// Run every registered cleanup context in insertion order, and clear
    /// the list. The aggregate stays live and reusable (spec.md §4.10,
    /// "clean").
    pub fn clean(&mut self) -> Result<()> {
        self.check_live()?;
        for context in self.contexts.drain(..) {
            log::debug!("kinetic-tli: running cleanup context {}", context.name);
            (context.run)();
        }
        Ok(())
    }

    /// Run every remaining cleanup context in insertion order, take the
    /// payload out, and poison the aggregate: every call after this returns
    /// `InvalidArgument` instead of touching freed state (spec.md §4.10,
    /// "destroy").
    pub fn destroy(&mut self) -> Result<T> {
        self.check_live()?;
        for context in self.contexts.drain(..) {
            (context.run)();
        }
        self.magic = 0;
        self.state = AggregateState::Poisoned;
        self.payload
            .take()
            .ok_or(Error::InvalidArgument("aggregate already destroyed"))
    }
}

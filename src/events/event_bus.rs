//! Ordered, per-kind listener registry with arity-aware dispatch.
//!
//! Listeners register under exactly one [`EventKind`] with a declared
//! [`Capacity`]; on emit the argument list is truncated to a fixed-capacity
//! listener's declared maximum (never padded), while unbounded listeners see
//! every argument. New trailing arguments can therefore be appended to an
//! event's payload over time without breaking existing handlers.
//!
//! Dispatch is synchronous and never fails: a listener error or panic is
//! reported through the log side channel and dispatch continues with the
//! next listener. The registry is populated during a one-time setup phase
//! and only read on the emit path, so concurrent emits from independent runs
//! contend on nothing but a read lock.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::events::event::{Event, EventArg, EventKind};

// ---------------------------------------------------------------------------
// Listener types
// ---------------------------------------------------------------------------

/// Failure reported by a listener; isolated and logged, never propagated to
/// the emitter.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ListenerError {
    pub message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// How many positional arguments a listener accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// At most this many arguments; the emitted list is truncated to fit.
    Fixed(usize),
    /// Every emitted argument.
    All,
}

/// A registered event handler function.
pub type ListenerFn = Arc<dyn Fn(&[EventArg]) -> Result<(), ListenerError> + Send + Sync>;

/// A named handler with a declared argument capacity.
#[derive(Clone)]
pub struct Listener {
    name: String,
    capacity: Capacity,
    handler: ListenerFn,
}

impl Listener {
    /// Create a listener with an explicit capacity declaration.
    pub fn new(
        name: impl Into<String>,
        capacity: Capacity,
        handler: impl Fn(&[EventArg]) -> Result<(), ListenerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            capacity,
            handler: Arc::new(handler),
        }
    }

    /// A listener that accepts every emitted argument.
    pub fn unbounded(
        name: impl Into<String>,
        handler: impl Fn(&[EventArg]) -> Result<(), ListenerError> + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, Capacity::All, handler)
    }

    /// A listener that accepts at most `max_args` arguments.
    pub fn with_capacity(
        name: impl Into<String>,
        max_args: usize,
        handler: impl Fn(&[EventArg]) -> Result<(), ListenerError> + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, Capacity::Fixed(max_args), handler)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Ordered listener registry shared by every run of the engine.
///
/// All mutable per-run state lives in each run's
/// [`RunContext`](crate::context::RunContext), never in the bus.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` to the ordered list for `kind`.
    ///
    /// Registration belongs to the setup phase; listeners for a kind are
    /// invoked in registration order.
    pub fn register(&self, kind: EventKind, listener: Listener) {
        self.listeners
            .write()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(listener);
    }

    /// Whether any listener with exactly this name is registered, under any
    /// kind. Installers use this as an idempotency sentinel.
    pub fn has_listener(&self, name: &str) -> bool {
        self.listeners
            .read()
            .unwrap()
            .values()
            .any(|entries| entries.iter().any(|l| l.name == name))
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap()
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Dispatch `event` to every listener registered for its kind.
    pub fn emit(&self, event: &Event) {
        self.dispatch(event.kind, &event.args);
    }

    /// Dispatch an argument list under `kind`.
    ///
    /// Fixed-capacity listeners receive the truncated argument prefix;
    /// unbounded listeners receive everything. Listener failures and panics
    /// are logged and swallowed; this method never fails.
    pub fn dispatch(&self, kind: EventKind, args: &[EventArg]) {
        let entries: Vec<Listener> = {
            let map = self.listeners.read().unwrap();
            match map.get(&kind) {
                Some(entries) => entries.clone(),
                None => return,
            }
        };

        for listener in &entries {
            let window = match listener.capacity {
                Capacity::All => args,
                Capacity::Fixed(max) => &args[..max.min(args.len())],
            };

            match catch_unwind(AssertUnwindSafe(|| (listener.handler)(window))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("[EventBus] listener '{}' failed on {kind}: {e}", listener.name);
                }
                Err(_) => {
                    log::error!("[EventBus] listener '{}' panicked on {kind}", listener.name);
                }
            }
        }
    }
}

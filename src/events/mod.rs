//! Lifecycle event infrastructure.
//!
//! This module provides the event contract between the orchestration engine
//! and its observers:
//! - [`EventKind`]: the closed set of lifecycle event kinds.
//! - [`Event`] / [`EventArg`]: an event kind plus its ordered argument list.
//! - [`EventBus`]: ordered, per-kind listener registry with arity-aware
//!   synchronous dispatch and per-listener failure isolation.

pub mod event;
pub mod event_bus;

pub use event::{Event, EventArg, EventKind, UnknownEventKind};
pub use event_bus::{Capacity, EventBus, Listener, ListenerError, ListenerFn};

//! # agent-trace
//!
//! Lifecycle-event dispatch and trace-span correlation for AI agent
//! orchestration engines.
//!
//! An orchestration engine announces what it is doing by emitting lifecycle
//! events (`run_start`, `agent_thinking`, `tool_start`, ...) on an
//! [`EventBus`](events::EventBus). The [`SpanCorrelator`](telemetry::SpanCorrelator)
//! listens to that flat stream and rebuilds the causal structure of the run
//! as a properly nested tree of trace spans on an external tracing backend,
//! consumed through the [`Tracer`](telemetry::Tracer) capability.
//!
//! The crate is deliberately passive: it never decides when spans should
//! exist (the event contract does), never persists trace data, and never
//! lets a telemetry failure propagate back into the run it observes.
//!
//! Wiring happens once through [`telemetry::install`]:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agent_trace::{install, Event, EventBus, RunContext, TracingConfig};
//!
//! let bus = install(
//!     Arc::new(EventBus::new()),
//!     TracingConfig::new(tracer).with_trace_name("agents.run"),
//! );
//!
//! let ctx = RunContext::new();
//! bus.emit(&Event::run_start("Triagem", "hello", &ctx));
//! // ... agent turns, tool calls ...
//! bus.emit(&Event::run_complete("Triagem", result, &ctx));
//! ```
//!
//! Concurrent runs share one bus and one correlator; all per-run state lives
//! inside each run's own [`RunContext`].

pub mod chat;
pub mod context;
pub mod events;
pub mod telemetry;

pub use chat::{AssistantMessage, Chat, ChatMessage};
pub use context::RunContext;
pub use events::{Capacity, Event, EventArg, EventBus, EventKind, Listener, ListenerError};
pub use telemetry::{
    install, NoopTracer, PropagationContext, Span, SpanCorrelator, Tracer, TracingConfig,
    DEFAULT_TRACE_NAME, HANDOFF_TOOL_PREFIX,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Trace-span correlation for lifecycle events.
//!
//! The telemetry layer turns the engine's flat event stream back into a
//! nested span tree on an external tracing backend:
//! - [`tracer`]: the consumed backend capability ([`Tracer`]/[`Span`]) and a
//!   null-object implementation for disabled telemetry.
//! - [`attributes`]: span-attribute key constants, the attribute
//!   serialization rule, and the pure root-attribute merge.
//! - [`correlator`]: the per-run state machine that opens, parents, and
//!   closes spans.
//! - [`installer`]: idempotent composition root wiring the correlator onto
//!   an [`EventBus`](crate::events::EventBus).
//!
//! Nothing here raises back into the orchestration flow: telemetry must
//! never break the system it observes.

pub mod attributes;
pub mod correlator;
pub mod installer;
#[cfg(feature = "otel")]
pub mod otel;
pub mod tracer;

#[cfg(test)]
pub(crate) mod testing;

pub use attributes::{attribute_text, keys, AttributeMap, DynamicAttributeFn};
pub use correlator::{SpanCorrelator, HANDOFF_TOOL_PREFIX};
pub use installer::{install, TracingConfig, DEFAULT_TRACE_NAME};
#[cfg(feature = "otel")]
pub use otel::OtelTracer;
pub use tracer::{NoopTracer, PropagationContext, Span, Tracer};

//! Consumed tracing-backend capability.
//!
//! The backend is opaque to this crate: spans are resources we only
//! sequence open/attribute/close/event calls on, and propagation contexts
//! are type-erased tokens the backend hands back so child spans can be
//! parented correctly. Adapters implement [`Tracer`] and [`Span`] for a
//! concrete backend; [`NoopTracer`] is the null object for disabled
//! telemetry.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::telemetry::attributes::AttributeMap;

// ---------------------------------------------------------------------------
// PropagationContext
// ---------------------------------------------------------------------------

/// Type-erased parenting token produced by [`Tracer::context_with_span`].
///
/// Only the backend that minted a context can interpret it; this crate just
/// stores and hands it back.
#[derive(Clone)]
pub struct PropagationContext(Arc<dyn Any + Send + Sync>);

impl PropagationContext {
    pub fn new(inner: Arc<dyn Any + Send + Sync>) -> Self {
        Self(inner)
    }

    /// Recover the backend's concrete context type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().downcast_ref()
    }
}

impl fmt::Debug for PropagationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PropagationContext(..)")
    }
}

// ---------------------------------------------------------------------------
// Span / Tracer
// ---------------------------------------------------------------------------

/// A timed unit of work on the tracing backend.
pub trait Span: Send + Sync {
    /// Set or replace one attribute on the open span.
    fn set_attribute(&self, key: &str, value: Value);

    /// Record a point-in-time event on the span.
    fn add_event(&self, name: &str, attributes: AttributeMap);

    /// Record an exception against the span.
    fn record_exception(&self, message: &str);

    /// Mark the span's status as error.
    fn set_error_status(&self, message: &str);

    /// Close the span. Further calls on a finished span are backend-defined
    /// no-ops.
    fn finish(&self);

    /// Concrete-type access for backend adapters.
    fn as_any(&self) -> &dyn Any;
}

/// The tracing backend this crate drives.
pub trait Tracer: Send + Sync {
    /// Open a span named `name` under `parent` (a root span when `None`)
    /// with its initial attributes.
    fn start_span(
        &self,
        name: &str,
        parent: Option<&PropagationContext>,
        attributes: AttributeMap,
    ) -> Arc<dyn Span>;

    /// Produce the parenting token for children of `span`.
    fn context_with_span(&self, span: &Arc<dyn Span>) -> PropagationContext;
}

// ---------------------------------------------------------------------------
// NoopTracer
// ---------------------------------------------------------------------------

/// Null-object backend: every span operation is absorbed.
#[derive(Debug, Default)]
pub struct NoopTracer;

struct NoopSpan;

impl Span for NoopSpan {
    fn set_attribute(&self, _key: &str, _value: Value) {}
    fn add_event(&self, _name: &str, _attributes: AttributeMap) {}
    fn record_exception(&self, _message: &str) {}
    fn set_error_status(&self, _message: &str) {}
    fn finish(&self) {}
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Tracer for NoopTracer {
    fn start_span(
        &self,
        _name: &str,
        _parent: Option<&PropagationContext>,
        _attributes: AttributeMap,
    ) -> Arc<dyn Span> {
        Arc::new(NoopSpan)
    }

    fn context_with_span(&self, _span: &Arc<dyn Span>) -> PropagationContext {
        PropagationContext::new(Arc::new(()))
    }
}

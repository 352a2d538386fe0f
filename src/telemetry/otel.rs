//! OpenTelemetry backend adapter (cargo feature `otel`).
//!
//! Maps the crate's [`Tracer`]/[`Span`] capability onto the `opentelemetry`
//! API: spans are built through a [`BoxedTracer`] and parented through
//! [`Context`]s, which double as the [`PropagationContext`] payload. Only the
//! API crate is required; provider and exporter wiring belong to the host.

use std::any::Any;
use std::sync::Arc;

use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::{Status, TraceContextExt, Tracer as _};
use opentelemetry::{Context, KeyValue};
use serde_json::Value;
use thiserror::Error;

use crate::telemetry::attributes::{attribute_text, AttributeMap};
use crate::telemetry::tracer::{PropagationContext, Span, Tracer};

/// [`Tracer`] implementation backed by an OpenTelemetry tracer.
pub struct OtelTracer {
    tracer: BoxedTracer,
}

impl OtelTracer {
    pub fn new(tracer: BoxedTracer) -> Self {
        Self { tracer }
    }

    /// Adapter over the globally registered tracer provider.
    pub fn global(name: &'static str) -> Self {
        Self::new(global::tracer(name))
    }
}

impl Tracer for OtelTracer {
    fn start_span(
        &self,
        name: &str,
        parent: Option<&PropagationContext>,
        attributes: AttributeMap,
    ) -> Arc<dyn Span> {
        let parent_cx = parent
            .and_then(|cx| cx.downcast_ref::<Context>())
            .cloned()
            .unwrap_or_else(Context::new);

        let builder = self
            .tracer
            .span_builder(name.to_string())
            .with_attributes(attributes.into_iter().map(|(key, value)| key_value(key, &value)));
        let span = self.tracer.build_with_context(builder, &parent_cx);

        Arc::new(OtelSpan {
            cx: parent_cx.with_span(span),
        })
    }

    fn context_with_span(&self, span: &Arc<dyn Span>) -> PropagationContext {
        let cx = span
            .as_any()
            .downcast_ref::<OtelSpan>()
            .map(|s| s.cx.clone())
            .unwrap_or_else(Context::new);
        PropagationContext::new(Arc::new(cx))
    }
}

/// One span held inside its own [`Context`] so children can be parented to
/// it and attribute calls go through the context's synchronized handle.
struct OtelSpan {
    cx: Context,
}

impl Span for OtelSpan {
    fn set_attribute(&self, key: &str, value: Value) {
        self.cx.span().set_attribute(key_value(key.to_string(), &value));
    }

    fn add_event(&self, name: &str, attributes: AttributeMap) {
        let attributes = attributes
            .into_iter()
            .map(|(key, value)| key_value(key, &value))
            .collect();
        self.cx.span().add_event(name.to_string(), attributes);
    }

    fn record_exception(&self, message: &str) {
        self.cx
            .span()
            .record_error(&RecordedException(message.to_string()));
    }

    fn set_error_status(&self, message: &str) {
        self.cx.span().set_status(Status::error(message.to_string()));
    }

    fn finish(&self) {
        self.cx.span().end();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Exception payload for `record_error`, which wants a `std::error::Error`.
#[derive(Debug, Error)]
#[error("{0}")]
struct RecordedException(String);

fn key_value(key: String, value: &Value) -> KeyValue {
    KeyValue::new(key, otel_value(value))
}

/// Scalars map onto their OpenTelemetry counterparts; everything else goes
/// through the shared textual encoding.
fn otel_value(value: &Value) -> opentelemetry::Value {
    match value {
        Value::Bool(b) => opentelemetry::Value::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => opentelemetry::Value::I64(i),
            None => opentelemetry::Value::F64(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => opentelemetry::Value::String(s.clone().into()),
        other => opentelemetry::Value::String(attribute_text(other).unwrap_or_default().into()),
    }
}

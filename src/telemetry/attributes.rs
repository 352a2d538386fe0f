//! Span-attribute keys, serialization, and root-attribute construction.
//!
//! Attribute construction is pure: the root merge reads static config, the
//! run context, and the user's dynamic provider, and returns a map with no
//! side effects. The serialization rule lives here too so every span
//! operation encodes values the same way.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::RunContext;

/// Span attribute payload.
pub type AttributeMap = HashMap<String, Value>;

/// User-supplied per-run attribute provider, invoked once at root-span open.
pub type DynamicAttributeFn = Arc<dyn Fn(&RunContext) -> AttributeMap + Send + Sync>;

/// Attribute key names the tracing backend expects.
///
/// These follow the GenAI / Langfuse OpenTelemetry conventions and must
/// match exactly for backend compatibility.
pub mod keys {
    pub const MODEL: &str = "gen_ai.request.model";
    pub const INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
    pub const OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
    pub const USER_ID: &str = "langfuse.user.id";
    pub const SESSION_ID: &str = "langfuse.session.id";
    pub const TRACE_TAGS: &str = "langfuse.trace.tags";
    pub const TRACE_INPUT: &str = "langfuse.trace.input";
    pub const TRACE_OUTPUT: &str = "langfuse.trace.output";
    pub const OBSERVATION_TYPE: &str = "langfuse.observation.type";
    pub const OBSERVATION_INPUT: &str = "langfuse.observation.input";
    pub const OBSERVATION_OUTPUT: &str = "langfuse.observation.output";
    pub const AGENT_NAME: &str = "agent.name";
    pub const HANDOFF_FROM: &str = "handoff.from";
    pub const HANDOFF_TO: &str = "handoff.to";
    pub const HANDOFF_REASON: &str = "handoff.reason";
}

/// Run-context key the session id is derived from.
pub(crate) const CTX_SESSION_ID: &str = "session_id";

/// Encode an attribute value as text.
///
/// Scalar text passes through unchanged; structured values are encoded as
/// JSON; empty and null values are omitted rather than written as empty
/// attributes. A value that cannot be serialized cleanly degrades to its
/// debug rendering instead of failing the span operation.
pub fn attribute_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => match serde_json::to_string(other) {
            Ok(text) => Some(text),
            Err(e) => {
                log::debug!("[SpanCorrelator] attribute serialization degraded: {e}");
                Some(format!("{other:?}"))
            }
        },
    }
}

/// Build the root span's attribute map.
///
/// Merge order: static attributes, then the session id derived from the run
/// context, then the serialized run input, then the dynamic provider's
/// output — later entries win on key collision.
pub(crate) fn build_root_attributes(
    static_attributes: &AttributeMap,
    dynamic_attributes: Option<&DynamicAttributeFn>,
    agent_name: &str,
    input: &str,
    ctx: &RunContext,
) -> AttributeMap {
    let mut attrs = static_attributes.clone();
    attrs.insert(keys::AGENT_NAME.into(), Value::String(agent_name.into()));

    if let Some(session_id) = ctx.get_str(CTX_SESSION_ID) {
        attrs.insert(keys::SESSION_ID.into(), Value::String(session_id));
    }

    if let Some(text) = attribute_text(&Value::String(input.to_string())) {
        attrs.insert(keys::TRACE_INPUT.into(), Value::String(text));
    }

    if let Some(provider) = dynamic_attributes {
        for (key, value) in provider(ctx) {
            attrs.insert(key, value);
        }
    }

    attrs
}

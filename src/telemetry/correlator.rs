//! Per-run span state machine.
//!
//! One [`SpanCorrelator`] instance serves every run: it owns only immutable
//! configuration, while all mutable state lives in each run's
//! [`TracingState`], parked inside that run's [`RunContext`] under a
//! reserved extension key so their lifetimes coincide.
//!
//! Per run the machine moves `IDLE → ROOT_OPEN → (+AGENT_OPEN) →
//! (+TOOL_OPEN) → … → CLOSED`. Every "open" transition first closes any
//! stale span of the same kind, so a missed completion notification can
//! never leak an unfinished span or corrupt nesting, and `run_complete`
//! sweeps whatever is still open before closing the root.

use std::sync::Arc;

use serde_json::Value;

use crate::chat::{AssistantMessage, Chat};
use crate::context::RunContext;
use crate::telemetry::attributes::{
    attribute_text, build_root_attributes, keys, AttributeMap, DynamicAttributeFn,
};
use crate::telemetry::tracer::{PropagationContext, Span, Tracer};

/// Reserved [`RunContext`] extension key for per-run tracing state.
pub(crate) const TRACING_STATE_KEY: &str = "telemetry.tracing_state";

/// Tools whose name starts with this prefix transfer control between
/// agents; their spans always parent to the root span, never to the open
/// agent span.
pub const HANDOFF_TOOL_PREFIX: &str = "handoff_to_";

// ---------------------------------------------------------------------------
// TracingState
// ---------------------------------------------------------------------------

/// Working state of one run, created on `run_start` and destroyed on
/// `run_complete`.
pub(crate) struct TracingState {
    root_span: Arc<dyn Span>,
    root_context: PropagationContext,
    current_agent: Option<String>,
    agent_span: Option<Arc<dyn Span>>,
    agent_context: Option<PropagationContext>,
    tool_span: Option<Arc<dyn Span>>,
    pending_input: Option<String>,
    last_output: Option<String>,
}

impl TracingState {
    fn new(root_span: Arc<dyn Span>, root_context: PropagationContext) -> Self {
        Self {
            root_span,
            root_context,
            current_agent: None,
            agent_span: None,
            agent_context: None,
            tool_span: None,
            pending_input: None,
            last_output: None,
        }
    }

    /// Close every span still open, innermost first.
    fn sweep(&mut self) {
        if let Some(tool) = self.tool_span.take() {
            tool.finish();
        }
        if let Some(agent) = self.agent_span.take() {
            agent.finish();
        }
        self.root_span.finish();
    }
}

// ---------------------------------------------------------------------------
// SpanCorrelator
// ---------------------------------------------------------------------------

/// Rebuilds the span tree of each run from its lifecycle event stream.
pub struct SpanCorrelator {
    tracer: Arc<dyn Tracer>,
    trace_name: String,
    static_attributes: AttributeMap,
    dynamic_attributes: Option<DynamicAttributeFn>,
}

impl SpanCorrelator {
    pub fn new(
        tracer: Arc<dyn Tracer>,
        trace_name: impl Into<String>,
        static_attributes: AttributeMap,
        dynamic_attributes: Option<DynamicAttributeFn>,
    ) -> Self {
        Self {
            tracer,
            trace_name: trace_name.into(),
            static_attributes,
            dynamic_attributes,
        }
    }

    /// Configured root span name.
    pub fn trace_name(&self) -> &str {
        &self.trace_name
    }

    fn agent_span_name(&self, agent_name: &str) -> String {
        format!("{}.agent.{}", self.trace_name, agent_name)
    }

    fn tool_span_name(&self, tool_name: &str) -> String {
        format!("{}.tool.{}", self.trace_name, tool_name)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// `run_start`: open the root span and install fresh per-run state.
    pub fn on_run_start(&self, agent_name: &str, input: &str, ctx: &Arc<RunContext>) {
        if let Some(mut stale) = ctx.remove_extension::<TracingState>(TRACING_STATE_KEY) {
            log::warn!(
                "[SpanCorrelator] run {} restarted with spans still open; closing stale spans",
                ctx.run_id()
            );
            stale.sweep();
        }

        let attrs = build_root_attributes(
            &self.static_attributes,
            self.dynamic_attributes.as_ref(),
            agent_name,
            input,
            ctx,
        );
        let root = self.tracer.start_span(&self.trace_name, None, attrs);
        let root_context = self.tracer.context_with_span(&root);
        ctx.attach_extension(TRACING_STATE_KEY, TracingState::new(root, root_context));
    }

    /// `agent_thinking`: record pending input and ensure an agent span is
    /// open for `agent_name`.
    ///
    /// Repeated notifications for the agent already owning the open span are
    /// absorbed; a different agent defensively closes the previous span and
    /// opens its own, parented to root.
    pub fn on_agent_thinking(&self, agent_name: &str, input: &str, ctx: &Arc<RunContext>) {
        let handled = ctx.with_extension::<TracingState, _>(TRACING_STATE_KEY, |state| {
            if !input.is_empty() {
                state.pending_input = Some(input.to_string());
            }

            if state.agent_span.is_some() && state.current_agent.as_deref() == Some(agent_name) {
                return;
            }

            if let Some(previous) = state.agent_span.take() {
                log::debug!(
                    "[SpanCorrelator] agent span for {:?} still open; closing before '{}'",
                    state.current_agent,
                    agent_name
                );
                previous.finish();
            }
            state.agent_context = None;

            let mut attrs = AttributeMap::new();
            attrs.insert(keys::AGENT_NAME.into(), Value::String(agent_name.into()));
            attrs.insert(keys::OBSERVATION_TYPE.into(), Value::String("agent".into()));
            if let Some(pending) = state.pending_input.take() {
                if let Some(text) = attribute_text(&Value::String(pending)) {
                    attrs.insert(keys::OBSERVATION_INPUT.into(), Value::String(text));
                }
            }

            let span =
                self.tracer
                    .start_span(&self.agent_span_name(agent_name), Some(&state.root_context), attrs);
            state.agent_context = Some(self.tracer.context_with_span(&span));
            state.agent_span = Some(span);
            state.current_agent = Some(agent_name.to_string());
        });

        if handled.is_none() {
            log::debug!("[SpanCorrelator] agent_thinking before run_start; ignoring");
        }
    }

    /// `chat_created`: hook the chat's assistant-message notification so
    /// each completed inference becomes one generation span.
    ///
    /// The parent is resolved at fire time: the agent span open at that
    /// moment, falling back to root.
    pub fn on_chat_created(
        &self,
        chat: &Arc<dyn Chat>,
        _agent_name: &str,
        model: &str,
        ctx: &Arc<RunContext>,
    ) {
        let tracer = self.tracer.clone();
        let span_name = format!("{}.generation", self.trace_name);
        let default_model = model.to_string();
        let chat_handle = chat.clone();
        let ctx = ctx.clone();

        chat.subscribe_assistant_message(Arc::new(move |message: &AssistantMessage| {
            let history = serde_json::to_value(chat_handle.messages()).unwrap_or(Value::Null);
            let handled = ctx.with_extension::<TracingState, _>(TRACING_STATE_KEY, |state| {
                let parent = state
                    .agent_context
                    .clone()
                    .unwrap_or_else(|| state.root_context.clone());

                let mut attrs = AttributeMap::new();
                attrs.insert(
                    keys::OBSERVATION_TYPE.into(),
                    Value::String("generation".into()),
                );
                let model_name = message.model.clone().unwrap_or_else(|| default_model.clone());
                attrs.insert(keys::MODEL.into(), Value::String(model_name));
                if let Some(text) = attribute_text(&history) {
                    attrs.insert(keys::OBSERVATION_INPUT.into(), Value::String(text));
                }

                let span = tracer.start_span(&span_name, Some(&parent), attrs);
                if let Some(tokens) = message.input_tokens {
                    span.set_attribute(keys::INPUT_TOKENS, Value::from(tokens));
                }
                if let Some(tokens) = message.output_tokens {
                    span.set_attribute(keys::OUTPUT_TOKENS, Value::from(tokens));
                }
                if let Some(text) = attribute_text(&Value::String(message.content.clone())) {
                    span.set_attribute(keys::OBSERVATION_OUTPUT, Value::String(text));
                }
                span.finish();

                state.last_output = Some(message.content.clone());
            });

            if handled.is_none() {
                log::debug!(
                    "[SpanCorrelator] assistant message outside an open run; dropping generation span"
                );
            }
        }));
    }

    /// `tool_start`: open a tool span.
    ///
    /// Handoff tools parent to root; anything else parents to the open
    /// agent span, falling back to root.
    pub fn on_tool_start(&self, tool_name: &str, args: &Value, ctx: &Arc<RunContext>) {
        let handled = ctx.with_extension::<TracingState, _>(TRACING_STATE_KEY, |state| {
            if let Some(stale) = state.tool_span.take() {
                log::debug!(
                    "[SpanCorrelator] tool span still open; closing before '{}'",
                    tool_name
                );
                stale.finish();
            }

            let parent = if tool_name.starts_with(HANDOFF_TOOL_PREFIX) {
                state.root_context.clone()
            } else {
                state
                    .agent_context
                    .clone()
                    .unwrap_or_else(|| state.root_context.clone())
            };

            let mut attrs = AttributeMap::new();
            attrs.insert(keys::OBSERVATION_TYPE.into(), Value::String("tool".into()));
            if let Some(text) = attribute_text(args) {
                attrs.insert(keys::OBSERVATION_INPUT.into(), Value::String(text));
            }

            state.tool_span =
                Some(self.tracer.start_span(&self.tool_span_name(tool_name), Some(&parent), attrs));
        });

        if handled.is_none() {
            log::debug!("[SpanCorrelator] tool_start before run_start; ignoring");
        }
    }

    /// `tool_complete`: close the open tool span with its serialized result.
    pub fn on_tool_complete(&self, tool_name: &str, result: &Value, ctx: &Arc<RunContext>) {
        ctx.with_extension::<TracingState, _>(TRACING_STATE_KEY, |state| {
            match state.tool_span.take() {
                Some(span) => {
                    if let Some(text) = attribute_text(result) {
                        span.set_attribute(keys::OBSERVATION_OUTPUT, Value::String(text));
                    }
                    span.finish();
                }
                None => log::debug!(
                    "[SpanCorrelator] tool_complete for '{}' with no open tool span",
                    tool_name
                ),
            }
        });
    }

    /// `agent_handoff`: a point-in-time event on the root span; no span
    /// lifecycle change.
    pub fn on_agent_handoff(
        &self,
        from_agent: &str,
        to_agent: &str,
        reason: &str,
        ctx: &Arc<RunContext>,
    ) {
        let event_name = format!("{}.handoff", self.trace_name);
        ctx.with_extension::<TracingState, _>(TRACING_STATE_KEY, |state| {
            let mut attrs = AttributeMap::new();
            attrs.insert(keys::HANDOFF_FROM.into(), Value::String(from_agent.into()));
            attrs.insert(keys::HANDOFF_TO.into(), Value::String(to_agent.into()));
            attrs.insert(keys::HANDOFF_REASON.into(), Value::String(reason.into()));
            state.root_span.add_event(&event_name, attrs);
        });
    }

    /// `agent_complete`: close the open agent span, attaching the last
    /// captured output text if present.
    pub fn on_agent_complete(&self, agent_name: &str, ctx: &Arc<RunContext>) {
        ctx.with_extension::<TracingState, _>(TRACING_STATE_KEY, |state| {
            match state.agent_span.take() {
                Some(span) => {
                    if let Some(output) = state.last_output.take() {
                        if let Some(text) = attribute_text(&Value::String(output)) {
                            span.set_attribute(keys::OBSERVATION_OUTPUT, Value::String(text));
                        }
                    }
                    span.finish();
                }
                None => log::debug!(
                    "[SpanCorrelator] agent_complete for '{}' with no open agent span",
                    agent_name
                ),
            }
            state.agent_context = None;
            state.current_agent = None;
        });
    }

    /// `run_complete`: sweep whatever is still open, finalize the root span,
    /// and discard the run's state.
    ///
    /// A structured result carrying a non-empty `error` member records an
    /// exception and marks the root status as error.
    pub fn on_run_complete(&self, result: &Value, ctx: &Arc<RunContext>) {
        let Some(mut state) = ctx.remove_extension::<TracingState>(TRACING_STATE_KEY) else {
            log::debug!("[SpanCorrelator] run_complete without tracing state; ignoring");
            return;
        };

        if let Some(tool) = state.tool_span.take() {
            tool.finish();
        }
        if let Some(agent) = state.agent_span.take() {
            agent.finish();
        }

        if let Some(text) = attribute_text(result) {
            state.root_span.set_attribute(keys::TRACE_OUTPUT, Value::String(text));
        }
        if let Some(error) = terminal_error(result) {
            state.root_span.record_exception(&error);
            state.root_span.set_error_status(&error);
        }
        state.root_span.finish();
    }
}

/// Error carried by a terminal result, if any.
fn terminal_error(result: &Value) -> Option<String> {
    match result.get("error") {
        Some(Value::String(message)) if !message.is_empty() => Some(message.clone()),
        Some(Value::Null) | None => None,
        Some(structured) => attribute_text(structured),
    }
}

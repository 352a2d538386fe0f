//! Composition root wiring the correlator onto an event bus.
//!
//! Installation is idempotent and atomic under concurrent first use: a
//! static gate serialises installers, and a sentinel listener name marks a
//! bus as already instrumented. When no tracing backend is configured the
//! install degrades to a logged no-op so the host run proceeds untraced
//! rather than failing.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::chat::Chat;
use crate::context::RunContext;
use crate::events::{EventArg, EventBus, EventKind, Listener, ListenerError};
use crate::telemetry::attributes::{AttributeMap, DynamicAttributeFn};
use crate::telemetry::correlator::SpanCorrelator;
use crate::telemetry::tracer::Tracer;

/// Root span name used when none is configured.
pub const DEFAULT_TRACE_NAME: &str = "agents.run";

// ---------------------------------------------------------------------------
// TracingConfig
// ---------------------------------------------------------------------------

/// Everything the correlator needs from the host.
pub struct TracingConfig {
    /// Tracing backend; `None` installs instrumentation as a no-op.
    pub tracer: Option<Arc<dyn Tracer>>,
    /// Root span name.
    pub trace_name: String,
    /// Attributes attached to every root span.
    pub static_attributes: AttributeMap,
    /// Optional per-run attribute provider, invoked once per run with the
    /// run context; wins key collisions against everything else.
    pub dynamic_attributes: Option<DynamicAttributeFn>,
}

impl TracingConfig {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self {
            tracer: Some(tracer),
            trace_name: DEFAULT_TRACE_NAME.to_string(),
            static_attributes: AttributeMap::new(),
            dynamic_attributes: None,
        }
    }

    /// A config with no backend; [`install`] becomes a no-op.
    pub fn disabled() -> Self {
        Self {
            tracer: None,
            trace_name: DEFAULT_TRACE_NAME.to_string(),
            static_attributes: AttributeMap::new(),
            dynamic_attributes: None,
        }
    }

    pub fn with_trace_name(mut self, trace_name: impl Into<String>) -> Self {
        self.trace_name = trace_name.into();
        self
    }

    pub fn with_static_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.static_attributes.insert(key.into(), value);
        self
    }

    pub fn with_dynamic_attributes(
        mut self,
        provider: impl Fn(&RunContext) -> AttributeMap + Send + Sync + 'static,
    ) -> Self {
        self.dynamic_attributes = Some(Arc::new(provider));
        self
    }
}

// ---------------------------------------------------------------------------
// install
// ---------------------------------------------------------------------------

static INSTALL_GATE: Mutex<()> = Mutex::new(());

fn listener_name(kind: EventKind) -> String {
    format!("tracing.{}", kind.as_str())
}

/// Wire span correlation onto `bus` and return the instrumented handle.
///
/// Repeated calls are no-ops returning the already-instrumented handle.
pub fn install(bus: Arc<EventBus>, config: TracingConfig) -> Arc<EventBus> {
    let _gate = INSTALL_GATE.lock().unwrap();

    if bus.has_listener(&listener_name(EventKind::RunStart)) {
        log::debug!("[TracingInstaller] event bus already instrumented; skipping");
        return bus;
    }

    let Some(tracer) = config.tracer else {
        log::warn!(
            "[TracingInstaller] no tracing backend configured; lifecycle events will not be traced"
        );
        return bus;
    };

    let correlator = Arc::new(SpanCorrelator::new(
        tracer,
        config.trace_name,
        config.static_attributes,
        config.dynamic_attributes,
    ));

    {
        let c = correlator.clone();
        bus.register(
            EventKind::RunStart,
            Listener::unbounded(listener_name(EventKind::RunStart), move |args| {
                c.on_run_start(text_arg(args, 0)?, text_arg(args, 1)?, context_arg(args)?);
                Ok(())
            }),
        );
    }
    {
        let c = correlator.clone();
        bus.register(
            EventKind::AgentThinking,
            Listener::unbounded(listener_name(EventKind::AgentThinking), move |args| {
                c.on_agent_thinking(text_arg(args, 0)?, text_arg(args, 1)?, context_arg(args)?);
                Ok(())
            }),
        );
    }
    {
        let c = correlator.clone();
        bus.register(
            EventKind::ChatCreated,
            Listener::unbounded(listener_name(EventKind::ChatCreated), move |args| {
                c.on_chat_created(
                    chat_arg(args, 0)?,
                    text_arg(args, 1)?,
                    text_arg(args, 2)?,
                    context_arg(args)?,
                );
                Ok(())
            }),
        );
    }
    {
        let c = correlator.clone();
        bus.register(
            EventKind::ToolStart,
            Listener::unbounded(listener_name(EventKind::ToolStart), move |args| {
                c.on_tool_start(text_arg(args, 0)?, data_arg(args, 1)?, context_arg(args)?);
                Ok(())
            }),
        );
    }
    {
        let c = correlator.clone();
        bus.register(
            EventKind::ToolComplete,
            Listener::unbounded(listener_name(EventKind::ToolComplete), move |args| {
                c.on_tool_complete(text_arg(args, 0)?, data_arg(args, 1)?, context_arg(args)?);
                Ok(())
            }),
        );
    }
    {
        let c = correlator.clone();
        bus.register(
            EventKind::AgentHandoff,
            Listener::unbounded(listener_name(EventKind::AgentHandoff), move |args| {
                c.on_agent_handoff(
                    text_arg(args, 0)?,
                    text_arg(args, 1)?,
                    text_arg(args, 2)?,
                    context_arg(args)?,
                );
                Ok(())
            }),
        );
    }
    {
        let c = correlator.clone();
        bus.register(
            EventKind::AgentComplete,
            Listener::unbounded(listener_name(EventKind::AgentComplete), move |args| {
                // The result and optional error members carry no span effect.
                c.on_agent_complete(text_arg(args, 0)?, context_arg(args)?);
                Ok(())
            }),
        );
    }
    {
        bus.register(
            EventKind::LlmCallComplete,
            // Accepted for interface compatibility; generation spans come
            // from the chat subscription instead.
            Listener::unbounded(listener_name(EventKind::LlmCallComplete), |_args| Ok(())),
        );
    }
    {
        let c = correlator;
        bus.register(
            EventKind::RunComplete,
            Listener::unbounded(listener_name(EventKind::RunComplete), move |args| {
                c.on_run_complete(data_arg(args, 1)?, context_arg(args)?);
                Ok(())
            }),
        );
    }

    bus
}

// ---------------------------------------------------------------------------
// Payload extraction
// ---------------------------------------------------------------------------

fn text_arg(args: &[EventArg], index: usize) -> Result<&str, ListenerError> {
    args.get(index)
        .and_then(EventArg::as_text)
        .ok_or_else(|| ListenerError::new(format!("expected text argument at position {index}")))
}

fn data_arg(args: &[EventArg], index: usize) -> Result<&Value, ListenerError> {
    args.get(index)
        .and_then(EventArg::as_data)
        .ok_or_else(|| ListenerError::new(format!("expected data argument at position {index}")))
}

fn chat_arg(args: &[EventArg], index: usize) -> Result<&Arc<dyn Chat>, ListenerError> {
    args.get(index)
        .and_then(EventArg::as_chat)
        .ok_or_else(|| ListenerError::new(format!("expected chat argument at position {index}")))
}

fn context_arg(args: &[EventArg]) -> Result<&Arc<RunContext>, ListenerError> {
    args.iter()
        .rev()
        .find_map(EventArg::as_context)
        .ok_or_else(|| ListenerError::new("event payload carries no run context"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{AssistantMessage, ChatMessage};
    use crate::events::Event;
    use crate::telemetry::attributes::keys;
    use crate::telemetry::testing::{RecordingTracer, ScriptedChat};
    use crate::telemetry::tracer::NoopTracer;
    use serde_json::json;
    use std::thread;

    fn instrumented(tracer: &Arc<RecordingTracer>) -> Arc<EventBus> {
        install(
            Arc::new(EventBus::new()),
            TracingConfig::new(tracer.clone()),
        )
    }

    #[test]
    fn test_install_registers_every_kind_once() {
        let tracer = RecordingTracer::new();
        let bus = instrumented(&tracer);
        for kind in EventKind::ALL {
            assert_eq!(bus.listener_count(kind), 1, "{kind}");
        }

        // Second install is a no-op returning the same instrumented handle.
        let again = install(bus.clone(), TracingConfig::new(tracer.clone()));
        assert!(Arc::ptr_eq(&bus, &again));
        for kind in EventKind::ALL {
            assert_eq!(again.listener_count(kind), 1, "{kind}");
        }
    }

    #[test]
    fn test_missing_backend_installs_nothing() {
        let _ = env_logger::builder().is_test(true).try_init();
        let bus = install(Arc::new(EventBus::new()), TracingConfig::disabled());
        for kind in EventKind::ALL {
            assert_eq!(bus.listener_count(kind), 0);
        }

        // The host run proceeds untraced rather than failing.
        let ctx = RunContext::new();
        bus.emit(&Event::run_start("Triagem", "hello", &ctx));
        bus.emit(&Event::run_complete("Triagem", json!({}), &ctx));
    }

    #[test]
    fn test_install_with_noop_backend_stays_silent() {
        let bus = install(
            Arc::new(EventBus::new()),
            TracingConfig::new(Arc::new(NoopTracer)),
        );
        let ctx = RunContext::new();
        bus.emit(&Event::run_start("Triagem", "hello", &ctx));
        bus.emit(&Event::run_complete("Triagem", json!({}), &ctx));
    }

    #[test]
    fn test_trivial_run_over_the_bus() {
        let tracer = RecordingTracer::new();
        let bus = instrumented(&tracer);
        let ctx = RunContext::new();

        bus.emit(&Event::run_start("Triagem", "hello", &ctx));
        bus.emit(&Event::run_complete("Triagem", json!({"output": "oi"}), &ctx));

        let spans = tracer.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "agents.run");
        assert_eq!(spans[0].attribute(keys::AGENT_NAME), Some(json!("Triagem")));
        assert_eq!(spans[0].attribute(keys::TRACE_INPUT), Some(json!("hello")));
        assert!(spans[0].is_finished());
    }

    #[test]
    fn test_full_turn_produces_nested_tree() {
        let tracer = RecordingTracer::new();
        let bus = instrumented(&tracer);
        let ctx = RunContext::new();
        let chat = ScriptedChat::new(vec![ChatMessage::new("user", "price?")]);

        bus.emit(&Event::run_start("Vendas", "price?", &ctx));
        bus.emit(&Event::chat_created(
            chat.clone(),
            "Vendas",
            "gpt-4o",
            &ctx,
        ));
        bus.emit(&Event::agent_thinking("Vendas", "price?", &ctx));
        bus.emit(&Event::tool_start("buscar_produto", json!({"q": "x"}), &ctx));
        bus.emit(&Event::tool_complete("buscar_produto", json!("found"), &ctx));
        chat.produce(AssistantMessage {
            content: "R$ 42".into(),
            model: None,
            input_tokens: Some(9),
            output_tokens: Some(3),
        });
        bus.emit(&Event::agent_complete("Vendas", json!({}), None, &ctx));
        bus.emit(&Event::run_complete("Vendas", json!({"output": "R$ 42"}), &ctx));

        let root = tracer.span_named("agents.run").unwrap();
        let agent = tracer.span_named("agents.run.agent.Vendas").unwrap();
        let tool = tracer.span_named("agents.run.tool.buscar_produto").unwrap();
        let generation = tracer.span_named("agents.run.generation").unwrap();

        assert_eq!(root.parent, None);
        assert_eq!(agent.parent.as_deref(), Some("agents.run"));
        assert_eq!(tool.parent.as_deref(), Some("agents.run.agent.Vendas"));
        assert_eq!(generation.parent.as_deref(), Some("agents.run.agent.Vendas"));
        assert_eq!(tracer.open_span_count(), 0);
        assert_eq!(root.attribute(keys::TRACE_OUTPUT), Some(json!(r#"{"output":"R$ 42"}"#)));
    }

    #[test]
    fn test_handoff_tool_parents_to_root_over_the_bus() {
        let tracer = RecordingTracer::new();
        let bus = instrumented(&tracer);
        let ctx = RunContext::new();

        bus.emit(&Event::run_start("Vendas", "ajuda", &ctx));
        bus.emit(&Event::agent_thinking("Vendas", "ajuda", &ctx));
        bus.emit(&Event::tool_start("handoff_to_suporte", json!({}), &ctx));
        bus.emit(&Event::agent_handoff("Vendas", "Suporte", "support request", &ctx));
        bus.emit(&Event::tool_complete("handoff_to_suporte", json!("ok"), &ctx));
        bus.emit(&Event::run_complete("Suporte", json!({}), &ctx));

        let tool = tracer.span_named("agents.run.tool.handoff_to_suporte").unwrap();
        assert_eq!(tool.parent.as_deref(), Some("agents.run"));

        let root = tracer.span_named("agents.run").unwrap();
        assert_eq!(root.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_llm_call_complete_is_accepted_and_ignored() {
        let tracer = RecordingTracer::new();
        let bus = instrumented(&tracer);
        let ctx = RunContext::new();

        bus.emit(&Event::run_start("Vendas", "price?", &ctx));
        bus.emit(&Event::llm_call_complete(
            "Vendas",
            "gpt-4o",
            json!({"content": "R$ 42"}),
            &ctx,
        ));
        bus.emit(&Event::run_complete("Vendas", json!({}), &ctx));

        assert_eq!(tracer.spans().len(), 1);
    }

    #[test]
    fn test_dynamic_attributes_reach_the_root_span() {
        let tracer = RecordingTracer::new();
        let bus = install(
            Arc::new(EventBus::new()),
            TracingConfig::new(tracer.clone())
                .with_trace_name("support.run")
                .with_static_attribute(keys::TRACE_TAGS, json!(["prod"]))
                .with_dynamic_attributes(|ctx| {
                    let mut attrs = AttributeMap::new();
                    attrs.insert(keys::USER_ID.into(), json!(ctx.get_str("user_id")));
                    attrs
                }),
        );

        let ctx = RunContext::new();
        ctx.set("user_id", json!("u-7"));
        ctx.set("session_id", json!("s-1"));
        bus.emit(&Event::run_start("Triagem", "oi", &ctx));
        bus.emit(&Event::run_complete("Triagem", json!({}), &ctx));

        let root = tracer.span_named("support.run").unwrap();
        assert_eq!(root.attribute(keys::TRACE_TAGS), Some(json!(["prod"])));
        assert_eq!(root.attribute(keys::USER_ID), Some(json!("u-7")));
        assert_eq!(root.attribute(keys::SESSION_ID), Some(json!("s-1")));
    }

    #[test]
    fn test_concurrent_runs_never_observe_each_other() {
        let tracer = RecordingTracer::new();
        let bus = instrumented(&tracer);

        let handles: Vec<_> = ["Triagem", "Vendas"]
            .into_iter()
            .map(|agent| {
                let bus = bus.clone();
                thread::spawn(move || {
                    for round in 0..50 {
                        let ctx = RunContext::new();
                        let input = format!("{agent} input {round}");
                        bus.emit(&Event::run_start(agent, input.as_str(), &ctx));
                        bus.emit(&Event::agent_thinking(agent, input.as_str(), &ctx));
                        bus.emit(&Event::tool_start("buscar_produto", json!({"round": round}), &ctx));
                        bus.emit(&Event::tool_complete("buscar_produto", json!("found"), &ctx));
                        bus.emit(&Event::agent_complete(agent, json!({}), None, &ctx));
                        bus.emit(&Event::run_complete(agent, json!({"output": input}), &ctx));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 2 threads x 50 runs x (root + agent + tool), all closed.
        let spans = tracer.spans();
        assert_eq!(spans.len(), 300);
        assert_eq!(tracer.open_span_count(), 0);

        // Each agent span parents to its own run's root and carries its own
        // agent name, never the other thread's.
        for span in spans.iter().filter(|s| s.name.starts_with("agents.run.agent.")) {
            let agent = span.name.rsplit('.').next().unwrap();
            assert_eq!(span.attribute(keys::AGENT_NAME), Some(json!(agent)));
            assert_eq!(span.parent.as_deref(), Some("agents.run"));
        }
        let triagem = spans.iter().filter(|s| s.name == "agents.run.agent.Triagem").count();
        let vendas = spans.iter().filter(|s| s.name == "agents.run.agent.Vendas").count();
        assert_eq!((triagem, vendas), (50, 50));
    }
}

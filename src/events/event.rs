//! Lifecycle event kinds and payloads.
//!
//! Events are a kind drawn from the closed [`EventKind`] enumeration plus an
//! ordered, kind-specific argument list whose final element is always the
//! run's [`RunContext`] handle. The per-kind constructors on [`Event`] build
//! the canonical payload shapes; callers remain free to append trailing
//! arguments, which fixed-capacity listeners never see (see
//! [`Capacity`](crate::events::Capacity)).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::chat::Chat;
use crate::context::RunContext;

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// The closed set of lifecycle event kinds an orchestration engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RunStart,
    AgentThinking,
    ChatCreated,
    ToolStart,
    ToolComplete,
    AgentHandoff,
    AgentComplete,
    LlmCallComplete,
    RunComplete,
}

impl EventKind {
    /// Every kind, in canonical lifecycle order.
    pub const ALL: [EventKind; 9] = [
        EventKind::RunStart,
        EventKind::AgentThinking,
        EventKind::ChatCreated,
        EventKind::ToolStart,
        EventKind::ToolComplete,
        EventKind::AgentHandoff,
        EventKind::AgentComplete,
        EventKind::LlmCallComplete,
        EventKind::RunComplete,
    ];

    /// Wire discriminator for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RunStart => "run_start",
            EventKind::AgentThinking => "agent_thinking",
            EventKind::ChatCreated => "chat_created",
            EventKind::ToolStart => "tool_start",
            EventKind::ToolComplete => "tool_complete",
            EventKind::AgentHandoff => "agent_handoff",
            EventKind::AgentComplete => "agent_complete",
            EventKind::LlmCallComplete => "llm_call_complete",
            EventKind::RunComplete => "run_complete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognised event-kind discriminator.
#[derive(Debug, Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// EventArg
// ---------------------------------------------------------------------------

/// One positional argument of an event payload.
#[derive(Clone)]
pub enum EventArg {
    /// Plain text (agent names, tool names, inputs, reasons).
    Text(String),
    /// Structured data (tool arguments, results, responses).
    Data(Value),
    /// Handle to the engine's chat collaborator.
    Chat(Arc<dyn Chat>),
    /// Handle to the run's state container; the final element of every
    /// canonical payload.
    Context(Arc<RunContext>),
}

impl EventArg {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventArg::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            EventArg::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_chat(&self) -> Option<&Arc<dyn Chat>> {
        match self {
            EventArg::Chat(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_context(&self) -> Option<&Arc<RunContext>> {
        match self {
            EventArg::Context(ctx) => Some(ctx),
            _ => None,
        }
    }
}

impl fmt::Debug for EventArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventArg::Text(s) => f.debug_tuple("Text").field(s).finish(),
            EventArg::Data(v) => f.debug_tuple("Data").field(v).finish(),
            EventArg::Chat(_) => f.write_str("Chat(..)"),
            EventArg::Context(ctx) => f.debug_tuple("Context").field(&ctx.run_id()).finish(),
        }
    }
}

impl From<&str> for EventArg {
    fn from(s: &str) -> Self {
        EventArg::Text(s.to_string())
    }
}

impl From<String> for EventArg {
    fn from(s: String) -> Self {
        EventArg::Text(s)
    }
}

impl From<Value> for EventArg {
    fn from(v: Value) -> Self {
        EventArg::Data(v)
    }
}

impl From<Arc<RunContext>> for EventArg {
    fn from(ctx: Arc<RunContext>) -> Self {
        EventArg::Context(ctx)
    }
}

impl From<Arc<dyn Chat>> for EventArg {
    fn from(chat: Arc<dyn Chat>) -> Self {
        EventArg::Chat(chat)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A lifecycle event: one [`EventKind`] plus its ordered argument list.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub args: Vec<EventArg>,
}

impl Event {
    /// A run begins processing `input` with `agent_name` as entry agent.
    pub fn run_start(
        agent_name: impl Into<String>,
        input: impl Into<String>,
        ctx: &Arc<RunContext>,
    ) -> Self {
        Self {
            kind: EventKind::RunStart,
            args: vec![
                EventArg::Text(agent_name.into()),
                EventArg::Text(input.into()),
                EventArg::Context(ctx.clone()),
            ],
        }
    }

    /// `agent_name` begins (or continues) reasoning over `input`.
    pub fn agent_thinking(
        agent_name: impl Into<String>,
        input: impl Into<String>,
        ctx: &Arc<RunContext>,
    ) -> Self {
        Self {
            kind: EventKind::AgentThinking,
            args: vec![
                EventArg::Text(agent_name.into()),
                EventArg::Text(input.into()),
                EventArg::Context(ctx.clone()),
            ],
        }
    }

    /// A chat object backing `agent_name` on `model` was created.
    pub fn chat_created(
        chat: Arc<dyn Chat>,
        agent_name: impl Into<String>,
        model: impl Into<String>,
        ctx: &Arc<RunContext>,
    ) -> Self {
        Self {
            kind: EventKind::ChatCreated,
            args: vec![
                EventArg::Chat(chat),
                EventArg::Text(agent_name.into()),
                EventArg::Text(model.into()),
                EventArg::Context(ctx.clone()),
            ],
        }
    }

    /// Tool `tool_name` starts executing with `args`.
    pub fn tool_start(
        tool_name: impl Into<String>,
        args: Value,
        ctx: &Arc<RunContext>,
    ) -> Self {
        Self {
            kind: EventKind::ToolStart,
            args: vec![
                EventArg::Text(tool_name.into()),
                EventArg::Data(args),
                EventArg::Context(ctx.clone()),
            ],
        }
    }

    /// Tool `tool_name` finished with `result`.
    pub fn tool_complete(
        tool_name: impl Into<String>,
        result: Value,
        ctx: &Arc<RunContext>,
    ) -> Self {
        Self {
            kind: EventKind::ToolComplete,
            args: vec![
                EventArg::Text(tool_name.into()),
                EventArg::Data(result),
                EventArg::Context(ctx.clone()),
            ],
        }
    }

    /// Active-agent responsibility moved from `from_agent` to `to_agent`.
    pub fn agent_handoff(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        reason: impl Into<String>,
        ctx: &Arc<RunContext>,
    ) -> Self {
        Self {
            kind: EventKind::AgentHandoff,
            args: vec![
                EventArg::Text(from_agent.into()),
                EventArg::Text(to_agent.into()),
                EventArg::Text(reason.into()),
                EventArg::Context(ctx.clone()),
            ],
        }
    }

    /// `agent_name` finished its turn.
    pub fn agent_complete(
        agent_name: impl Into<String>,
        result: Value,
        error: Option<String>,
        ctx: &Arc<RunContext>,
    ) -> Self {
        Self {
            kind: EventKind::AgentComplete,
            args: vec![
                EventArg::Text(agent_name.into()),
                EventArg::Data(result),
                EventArg::Data(error.map(Value::String).unwrap_or(Value::Null)),
                EventArg::Context(ctx.clone()),
            ],
        }
    }

    /// A model call made on behalf of `agent_name` completed.
    pub fn llm_call_complete(
        agent_name: impl Into<String>,
        model: impl Into<String>,
        response: Value,
        ctx: &Arc<RunContext>,
    ) -> Self {
        Self {
            kind: EventKind::LlmCallComplete,
            args: vec![
                EventArg::Text(agent_name.into()),
                EventArg::Text(model.into()),
                EventArg::Data(response),
                EventArg::Context(ctx.clone()),
            ],
        }
    }

    /// The run finished with a terminal `result`.
    pub fn run_complete(
        agent_name: impl Into<String>,
        result: Value,
        ctx: &Arc<RunContext>,
    ) -> Self {
        Self {
            kind: EventKind::RunComplete,
            args: vec![
                EventArg::Text(agent_name.into()),
                EventArg::Data(result),
                EventArg::Context(ctx.clone()),
            ],
        }
    }

    /// The run-context handle carried by this event, scanning from the end
    /// so appended trailing arguments do not hide it.
    pub fn context(&self) -> Option<&Arc<RunContext>> {
        self.args.iter().rev().find_map(EventArg::as_context)
    }
}

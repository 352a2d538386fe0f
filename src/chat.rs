//! Chat collaborator interface.
//!
//! The orchestration engine owns the chat object that performs model
//! inference; this crate only needs two capabilities from it: the prior
//! message list, and a subscribable "assistant message produced" notification
//! fired synchronously when a model response completes. The correlator uses
//! the notification to emit one short-lived generation span per inference.

use std::sync::Arc;

use serde::Serialize;

/// One message of the prior conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Message role (`"system"`, `"user"`, `"assistant"`, `"tool"`).
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A completed model response, as delivered to assistant-message hooks.
#[derive(Debug, Clone)]
pub struct AssistantMessage {
    /// Response text.
    pub content: String,
    /// Model that produced the response, when the chat reports it.
    pub model: Option<String>,
    /// Prompt token count, when the chat reports usage.
    pub input_tokens: Option<u64>,
    /// Completion token count, when the chat reports usage.
    pub output_tokens: Option<u64>,
}

/// Callback invoked synchronously each time an assistant message completes.
pub type AssistantMessageHook = Arc<dyn Fn(&AssistantMessage) + Send + Sync>;

/// Capabilities this crate consumes from the engine's chat object.
///
/// Multiple subscribers are supported; hooks are invoked in subscription
/// order at message-completion time, on the thread that completed the
/// message.
pub trait Chat: Send + Sync {
    /// The conversation so far, oldest message first, not including the
    /// response currently being delivered.
    fn messages(&self) -> Vec<ChatMessage>;

    /// Subscribe to assistant-message-produced notifications.
    fn subscribe_assistant_message(&self, hook: AssistantMessageHook);
}

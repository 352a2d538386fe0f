//! In-memory tracing backend and chat double shared by the unit tests.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::chat::{AssistantMessage, AssistantMessageHook, Chat, ChatMessage};
use crate::telemetry::attributes::AttributeMap;
use crate::telemetry::tracer::{PropagationContext, Span, Tracer};

// ---------------------------------------------------------------------------
// RecordingTracer
// ---------------------------------------------------------------------------

pub(crate) struct RecordedSpan {
    pub name: String,
    /// Name of the parent span, resolved from the propagation context.
    pub parent: Option<String>,
    pub attributes: Mutex<AttributeMap>,
    pub events: Mutex<Vec<(String, AttributeMap)>>,
    pub exceptions: Mutex<Vec<String>>,
    pub error_status: Mutex<Option<String>>,
    finished: AtomicBool,
}

impl RecordedSpan {
    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.lock().unwrap().get(key).cloned()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Span for RecordedSpan {
    fn set_attribute(&self, key: &str, value: Value) {
        self.attributes.lock().unwrap().insert(key.to_string(), value);
    }

    fn add_event(&self, name: &str, attributes: AttributeMap) {
        self.events.lock().unwrap().push((name.to_string(), attributes));
    }

    fn record_exception(&self, message: &str) {
        self.exceptions.lock().unwrap().push(message.to_string());
    }

    fn set_error_status(&self, message: &str) {
        *self.error_status.lock().unwrap() = Some(message.to_string());
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Tracing backend recording every span in creation order.
#[derive(Default)]
pub(crate) struct RecordingTracer {
    spans: Mutex<Vec<Arc<RecordedSpan>>>,
}

impl RecordingTracer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spans(&self) -> Vec<Arc<RecordedSpan>> {
        self.spans.lock().unwrap().clone()
    }

    pub fn span_named(&self, name: &str) -> Option<Arc<RecordedSpan>> {
        self.spans().into_iter().find(|s| s.name == name)
    }

    pub fn open_span_count(&self) -> usize {
        self.spans().iter().filter(|s| !s.is_finished()).count()
    }
}

impl Tracer for RecordingTracer {
    fn start_span(
        &self,
        name: &str,
        parent: Option<&PropagationContext>,
        attributes: AttributeMap,
    ) -> Arc<dyn Span> {
        let parent = parent.and_then(|cx| cx.downcast_ref::<String>()).cloned();
        let span = Arc::new(RecordedSpan {
            name: name.to_string(),
            parent,
            attributes: Mutex::new(attributes),
            events: Mutex::new(Vec::new()),
            exceptions: Mutex::new(Vec::new()),
            error_status: Mutex::new(None),
            finished: AtomicBool::new(false),
        });
        self.spans.lock().unwrap().push(span.clone());
        span
    }

    fn context_with_span(&self, span: &Arc<dyn Span>) -> PropagationContext {
        let name = span
            .as_any()
            .downcast_ref::<RecordedSpan>()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        PropagationContext::new(Arc::new(name))
    }
}

// ---------------------------------------------------------------------------
// ScriptedChat
// ---------------------------------------------------------------------------

/// Chat double: a fixed prior conversation plus a manual trigger for the
/// assistant-message notification.
pub(crate) struct ScriptedChat {
    history: Mutex<Vec<ChatMessage>>,
    hooks: Mutex<Vec<AssistantMessageHook>>,
}

impl ScriptedChat {
    pub fn new(history: Vec<ChatMessage>) -> Arc<Self> {
        Arc::new(Self {
            history: Mutex::new(history),
            hooks: Mutex::new(Vec::new()),
        })
    }

    /// Complete one assistant message: fire every hook with it, then append
    /// it to the conversation.
    pub fn produce(&self, message: AssistantMessage) {
        let hooks: Vec<AssistantMessageHook> = self.hooks.lock().unwrap().clone();
        for hook in &hooks {
            hook(&message);
        }
        self.history
            .lock()
            .unwrap()
            .push(ChatMessage::new("assistant", message.content));
    }
}

impl Chat for ScriptedChat {
    fn messages(&self) -> Vec<ChatMessage> {
        self.history.lock().unwrap().clone()
    }

    fn subscribe_assistant_message(&self, hook: AssistantMessageHook) {
        self.hooks.lock().unwrap().push(hook);
    }
}

//! Per-run state container owned by the orchestration engine.
//!
//! A [`RunContext`] accompanies one end-to-end run through the engine and is
//! passed (by handle) as the final argument of every lifecycle event for that
//! run. The engine guarantees a context is never touched by two runs
//! concurrently; the internal locks exist only to make the handle `Sync`, not
//! to coordinate runs.
//!
//! Besides the engine's own key/value data (session id, user id, ...), the
//! context carries a string-keyed extension map in which collaborators park
//! typed working state for the lifetime of the run. The span correlator keeps
//! its [`TracingState`](crate::telemetry) under a reserved key here, so both
//! are destroyed together.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Per-run key/value store plus typed extension slots.
pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    values: Mutex<HashMap<String, Value>>,
    extensions: Mutex<HashMap<&'static str, Box<dyn Any + Send>>>,
}

impl RunContext {
    /// Create an empty context for a new run.
    pub fn new() -> Arc<Self> {
        Self::with_values(HashMap::new())
    }

    /// Create a context pre-populated with engine values such as
    /// `session_id` or `user_id`.
    pub fn with_values(values: HashMap<String, Value>) -> Arc<Self> {
        Arc::new(Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            values: Mutex::new(values),
            extensions: Mutex::new(HashMap::new()),
        })
    }

    /// Unique identifier of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// When this context was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Store a value under `key`, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.lock().unwrap().insert(key.into(), value);
    }

    /// Fetch a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().unwrap().get(key).cloned()
    }

    /// Fetch the value under `key` if it is a non-empty string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Attach typed working state under a reserved extension key, replacing
    /// any previous attachment under the same key.
    pub fn attach_extension<T: Any + Send>(&self, key: &'static str, value: T) {
        self.extensions.lock().unwrap().insert(key, Box::new(value));
    }

    /// Run `f` with mutable access to the extension stored under `key`.
    ///
    /// Returns `None` when nothing of type `T` is attached there.
    pub fn with_extension<T: Any + Send, R>(
        &self,
        key: &'static str,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let mut extensions = self.extensions.lock().unwrap();
        let value = extensions.get_mut(key)?.downcast_mut::<T>()?;
        Some(f(value))
    }

    /// Detach and return the extension stored under `key`.
    ///
    /// The attachment is left in place when it is not of type `T`.
    pub fn remove_extension<T: Any + Send>(&self, key: &'static str) -> Option<T> {
        let mut extensions = self.extensions.lock().unwrap();
        if !extensions.get(key)?.is::<T>() {
            return None;
        }
        extensions
            .remove(key)
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Whether anything is attached under `key`.
    pub fn has_extension(&self, key: &str) -> bool {
        self.extensions.lock().unwrap().contains_key(key)
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

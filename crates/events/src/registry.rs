//! Event-type → handler resolution.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::handler::{EventHandler, FnHandler, HandlerResult};

/// Maps event types to handlers.
///
/// Keys are either exact event types (`Payment.Succeeded`) or category
/// patterns ending in `.*` (`Payment.*`). Exact matches win; among patterns
/// the longest prefix wins.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for an event type or pattern.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Register a synchronous closure.
    pub fn register_fn<F>(&mut self, event_type: impl Into<String>, f: F)
    where
        F: Fn(&str, &JsonValue) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(event_type, Arc::new(FnHandler::new(f)));
    }

    /// Builder-style `register`.
    pub fn with_handler(
        mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        self.register(event_type, handler);
        self
    }

    pub fn resolve(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        if let Some(h) = self.handlers.get(event_type) {
            return Some(h.clone());
        }

        self.handlers
            .iter()
            .filter_map(|(pattern, handler)| {
                let prefix = pattern.strip_suffix(".*")?;
                let rest = event_type.strip_prefix(prefix)?;
                rest.starts_with('.').then_some((prefix.len(), handler))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, handler)| handler.clone())
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.resolve(event_type).is_some()
    }

    /// Registered keys, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        let mut keys: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

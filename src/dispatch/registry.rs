//! Event-name → handler table bound to a connection.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::reply::{HandlerError, Reply};

/// Business-logic callback invoked with a packet's `data`.
pub type Handler = Arc<dyn Fn(Value) -> Result<Reply, HandlerError> + Send + Sync>;

/// A single `(event, handler)` binding.
#[derive(Clone)]
pub struct HandlerBinding {
    event: String,
    handler: Handler,
}

impl HandlerBinding {
    /// Binds `handler` to `event`.
    pub fn new<F>(event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Reply, HandlerError> + Send + Sync + 'static,
    {
        Self {
            event: event.into(),
            handler: Arc::new(handler),
        }
    }

    /// The event name this binding answers to.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// The bound handler.
    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

/// Ordered handler table.
///
/// Lookup is a linear scan for the first exact event-name match. Tables are
/// small and bound once per connection, so the scan is never on a hot path
/// worth indexing. When the same event is registered twice the first binding
/// wins; the duplicate is logged at registration time.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    bindings: Vec<HandlerBinding>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration of a single handler.
    #[must_use]
    pub fn with<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Reply, HandlerError> + Send + Sync + 'static,
    {
        self.register([HandlerBinding::new(event, handler)]);
        self
    }

    /// Appends `bindings` in order.
    pub fn register(&mut self, bindings: impl IntoIterator<Item = HandlerBinding>) {
        for binding in bindings {
            if self.resolve(binding.event()).is_some() {
                tracing::warn!(
                    event = binding.event(),
                    "duplicate handler registered; the first binding stays active"
                );
            }
            self.bindings.push(binding);
        }
    }

    /// Returns the first handler bound to `event`.
    #[must_use]
    pub fn resolve(&self, event: &str) -> Option<&Handler> {
        self.bindings
            .iter()
            .find(|binding| binding.event == event)
            .map(HandlerBinding::handler)
    }

    /// Registered event names in registration order.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(HandlerBinding::event)
    }

    /// Number of bindings, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl FromIterator<HandlerBinding> for HandlerRegistry {
    fn from_iter<I: IntoIterator<Item = HandlerBinding>>(iter: I) -> Self {
        let mut registry = Self::new();
        registry.register(iter);
        registry
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    fn reply_with(tag: &'static str) -> impl Fn(Value) -> Result<Reply, HandlerError> {
        move |_| Ok(Reply::Value(json!(tag)))
    }

    fn call(registry: &HandlerRegistry, event: &str) -> Option<Value> {
        let handler = registry.resolve(event)?;
        match handler(Value::Null) {
            Ok(Reply::Value(value)) => Some(value),
            _ => None,
        }
    }

    #[test]
    fn resolves_exact_match() {
        let registry = HandlerRegistry::new()
            .with("ping", reply_with("ping"))
            .with("pong", reply_with("pong"));
        assert_eq!(call(&registry, "pong"), Some(json!("pong")));
        assert!(registry.resolve("Ping").is_none());
        assert!(registry.resolve("pin").is_none());
    }

    #[test]
    fn first_duplicate_wins() {
        let registry: HandlerRegistry = [
            HandlerBinding::new("ping", reply_with("first")),
            HandlerBinding::new("ping", reply_with("second")),
        ]
        .into_iter()
        .collect();
        assert_eq!(registry.len(), 2);
        assert_eq!(call(&registry, "ping"), Some(json!("first")));
    }

    #[test]
    fn events_keep_registration_order() {
        let registry = HandlerRegistry::new()
            .with("b", reply_with("b"))
            .with("a", reply_with("a"));
        assert_eq!(registry.events().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.resolve("ping").is_none());
    }
}

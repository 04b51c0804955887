//! Progress events emitted while a research run is in flight.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::research::{Finding, ResearchQuery, ResearchResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A validated query is about to be researched.
    Start { query: ResearchQuery },
    /// Narrative text from the model.
    Thinking { text: String },
    ToolCall { tool: String, input: Value },
    /// Raw tool output, exactly as handed back to the model.
    ToolResult { tool: String, result: String },
    Finding { finding: Finding },
    Complete { result: ResearchResult },
    Error { error: String },
}

impl OrchestratorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::Start { .. } => "start",
            OrchestratorEvent::Thinking { .. } => "thinking",
            OrchestratorEvent::ToolCall { .. } => "tool_call",
            OrchestratorEvent::ToolResult { .. } => "tool_result",
            OrchestratorEvent::Finding { .. } => "finding",
            OrchestratorEvent::Complete { .. } => "complete",
            OrchestratorEvent::Error { .. } => "error",
        }
    }

    /// True for the event that ends a run (`complete` or `error`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorEvent::Complete { .. } | OrchestratorEvent::Error { .. }
        )
    }
}

type Handler = Arc<dyn Fn(&OrchestratorEvent) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    next_id: u64,
    entries: Vec<(u64, Handler)>,
}

/// Ordered list of event handlers owned by one orchestrator.
#[derive(Clone, Default)]
pub struct EventEmitter {
    handlers: Arc<Mutex<Handlers>>,
}

/// Returned by [`EventEmitter::on_event`]; call `unsubscribe` to detach the
/// handler. Dropping it leaves the handler registered.
#[must_use = "dropping a Subscription keeps the handler registered for the emitter's lifetime"]
pub struct Subscription {
    id: u64,
    handlers: Weak<Mutex<Handlers>>,
}

impl Subscription {
    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(handlers) = self.handlers.upgrade() else {
            return false;
        };
        let mut guard = lock(&handlers);
        let before = guard.entries.len();
        guard.entries.retain(|(id, _)| *id != self.id);
        guard.entries.len() != before
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&OrchestratorEvent) + Send + Sync + 'static,
    {
        let mut guard = lock(&self.handlers);
        let id = guard.next_id;
        guard.next_id += 1;
        guard.entries.push((id, Arc::new(handler)));

        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Forward events into a broadcast channel for async consumers.
    pub fn channel(
        &self,
        capacity: usize,
    ) -> (Subscription, broadcast::Receiver<OrchestratorEvent>) {
        let (tx, rx) = broadcast::channel(capacity);
        let subscription = self.on_event(move |event| {
            // No receivers left is not an error for the emitter.
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    /// Call every handler registered at this moment, in registration order.
    ///
    /// Handlers run outside the lock, so they may subscribe or unsubscribe
    /// without deadlocking. A panicking handler is logged and skipped.
    pub fn emit(&self, event: &OrchestratorEvent) {
        let snapshot: Vec<Handler> = lock(&self.handlers)
            .entries
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in snapshot {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(event = event.name(), "Event handler panicked");
            }
        }
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).entries.len()
    }
}

fn lock(handlers: &Mutex<Handlers>) -> MutexGuard<'_, Handlers> {
    handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thinking(text: &str) -> OrchestratorEvent {
        OrchestratorEvent::Thinking {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_handlers_called_in_order() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let seen = Arc::clone(&seen);
            let _sub = emitter.on_event(move |_| seen.lock().unwrap().push(label));
        }

        emitter.emit(&thinking("planning"));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_unsubscribe() {
        let emitter = EventEmitter::new();
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let sub = emitter.on_event(move |_| *counter.lock().unwrap() += 1);

        emitter.emit(&thinking("a"));
        assert!(sub.unsubscribe());
        emitter.emit(&thinking("b"));

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(emitter.handler_count(), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let emitter = EventEmitter::new();
        let reached = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&reached);

        let _a = emitter.on_event(|_| panic!("handler bug"));
        let _b = emitter.on_event(move |_| *flag.lock().unwrap() = true);

        emitter.emit(&thinking("x"));
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn test_emitters_are_isolated() {
        let a = EventEmitter::new();
        let b = EventEmitter::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let _sub = a.on_event(move |_| *counter.lock().unwrap() += 1);

        b.emit(&thinking("elsewhere"));
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_channel_forwards_events() {
        let emitter = EventEmitter::new();
        let (_sub, mut rx) = emitter.channel(8);

        emitter.emit(&thinking("hello"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "thinking");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = OrchestratorEvent::ToolCall {
            tool: "web_search".to_string(),
            input: serde_json::json!({"query": "Tomorrowland organizers"}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["tool"], "web_search");
    }
}

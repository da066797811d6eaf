//! Per-path table of event kind to handler.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::event::EventKind;
use super::handler::Handler;

/// Handlers for one watched path, at most one per [`EventKind`].
///
/// Registration takes the write lock, lookups take the read lock, so a
/// registry can keep being populated after it is attached to a running
/// [`WatchService`](super::WatchService).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<EventKind, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the handler for `kind`, replacing any previous one.
    pub fn set_handler(&self, kind: EventKind, handler: impl Handler) {
        let previous = self.handlers.write().insert(kind, Arc::new(handler));
        if previous.is_some() {
            crate::debug_event!("registry", "replaced", "{kind} handler");
        }
    }

    /// Look up the handler for `kind`.
    pub fn get_handler(&self, kind: EventKind) -> Option<Arc<dyn Handler>> {
        self.handlers.read().get(&kind).cloned()
    }

    /// Kinds with a handler installed, in classification priority order.
    pub fn kinds(&self) -> Vec<EventKind> {
        let handlers = self.handlers.read();
        EventKind::ALL
            .into_iter()
            .filter(|kind| handlers.contains_key(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

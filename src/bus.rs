//! Event bus collaborator.
//!
//! The client publishes everything it observes onto an [`EventBus`]: client
//! lifecycle events at `<namespace>.<event>` and resource events at
//! `<namespace>.resource.<rid>.<event>`. By default all clients in the
//! process share one bus; pass a dedicated bus through the client
//! configuration to isolate them.

use crate::error::Error;
use crate::types::Value;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Callback invoked for each matching event with `(event name, data)`.
pub type Handler = Arc<dyn Fn(&str, &EventData) + Send + Sync>;

/// Token returned by [`EventBus::on`], used to remove the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Payload attached to an emitted event.
#[derive(Clone, Debug)]
pub enum EventData {
    /// No payload (`connect`, `close`, `unsubscribe`).
    None,
    /// Pass-through payload of a custom event.
    Json(serde_json::Value),
    /// A model changed: old values of the keys that changed, `None` for keys
    /// that were previously absent.
    Change {
        old_values: BTreeMap<String, Option<Value>>,
    },
    /// A value was inserted into a collection.
    Add { value: Value, idx: usize },
    /// A value was removed from a collection.
    Remove { value: Value, idx: usize },
    /// A client-level `error` event.
    ClientError(Arc<Error>),
}

struct Registration {
    target: String,
    events: Option<Vec<String>>,
    handler: Handler,
}

struct BusInner {
    next_id: u64,
    handlers: HashMap<u64, Registration>,
}

/// A subject-addressed event emitter.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        EventBus {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 1,
                handlers: HashMap::new(),
            })),
        }
    }

    /// Register a handler for events emitted on `target`.
    ///
    /// `events` is an optional space-separated filter of event names;
    /// `None` matches every event on the target.
    pub fn on(&self, target: &str, events: Option<&str>, handler: Handler) -> HandlerId {
        let events = events.map(|e| e.split_whitespace().map(str::to_string).collect());
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.insert(
            id,
            Registration {
                target: target.to_string(),
                events,
                handler,
            },
        );
        HandlerId(id)
    }

    /// Remove a handler. Returns `false` if the id is unknown.
    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.lock().handlers.remove(&id.0).is_some()
    }

    /// Remove a handler only if it was registered on `target`.
    pub(crate) fn off_matching(&self, id: HandlerId, target: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.handlers.get(&id.0) {
            Some(reg) if reg.target == target => {
                inner.handlers.remove(&id.0);
                true
            }
            _ => false,
        }
    }

    /// Emit an event to every handler registered on `target` whose filter
    /// matches `event`. Handlers run outside the bus lock and may re-enter
    /// the client.
    pub fn emit(&self, target: &str, event: &str, data: &EventData) {
        let matching: Vec<Handler> = {
            let inner = self.inner.lock();
            inner
                .handlers
                .values()
                .filter(|reg| {
                    reg.target == target
                        && reg
                            .events
                            .as_ref()
                            .map_or(true, |names| names.iter().any(|n| n == event))
                })
                .map(|reg| reg.handler.clone())
                .collect()
        };
        for handler in matching {
            handler(event, data);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

static DEFAULT_BUS: Lazy<EventBus> = Lazy::new(EventBus::new);

/// The process-wide bus used when a client is not given its own.
#[must_use]
pub fn default_bus() -> EventBus {
    DEFAULT_BUS.clone()
}

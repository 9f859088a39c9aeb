//! Leveled, non-fatal diagnostic events with any number of subscribers.
//!
//! Each [`Connection`](crate::Connection) and [`ResultView`](crate::ResultView) owns
//! its own hub. Every published event is also forwarded to `tracing`, so a process-wide
//! subscriber sees the same stream without registering per instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// Severity of a diagnostic event. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticLevel::Debug => "debug",
            DiagnosticLevel::Info => "info",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// A single event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEvent {
    /// Name of the component that published the event.
    pub source: &'static str,
    pub level: DiagnosticLevel,
    pub message: String,
}

type Handler = Arc<dyn Fn(&DiagnosticEvent) + Send + Sync>;

struct Subscriber {
    min_level: DiagnosticLevel,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

/// Broadcasts diagnostic events to subscribers whose threshold is at or below the
/// event's level.
pub struct DiagnosticsHub {
    source: &'static str,
    registry: Arc<Mutex<Registry>>,
}

impl DiagnosticsHub {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Register `handler` for every event at `min_level` or above.
    /// The returned handle removes the subscription when invoked.
    pub fn subscribe<F>(&self, handler: F, min_level: DiagnosticLevel) -> Unsubscribe
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.insert(
            id,
            Subscriber {
                min_level,
                handler: Arc::new(handler),
            },
        );
        Unsubscribe {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    pub fn publish(&self, level: DiagnosticLevel, message: impl Into<String>) {
        let event = DiagnosticEvent {
            source: self.source,
            level,
            message: message.into(),
        };

        match level {
            DiagnosticLevel::Debug => tracing::debug!(source = event.source, "{}", event.message),
            DiagnosticLevel::Info => tracing::info!(source = event.source, "{}", event.message),
            DiagnosticLevel::Warning => tracing::warn!(source = event.source, "{}", event.message),
            DiagnosticLevel::Error => tracing::error!(source = event.source, "{}", event.message),
        }

        // Handlers run outside the lock so they may subscribe or unsubscribe.
        let handlers: Vec<Handler> = lock(&self.registry)
            .subscribers
            .values()
            .filter(|s| s.min_level <= level)
            .map(|s| Arc::clone(&s.handler))
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.publish(DiagnosticLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.publish(DiagnosticLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.publish(DiagnosticLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(DiagnosticLevel::Error, message);
    }
}

impl fmt::Debug for DiagnosticsHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticsHub")
            .field("source", &self.source)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Capability returned by [`DiagnosticsHub::subscribe`].
///
/// Dropping it leaves the subscription in place; call [`Unsubscribe::unsubscribe`]
/// to remove it.
#[must_use = "dropping an Unsubscribe handle keeps the subscription alive forever"]
pub struct Unsubscribe {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Unsubscribe {
    /// Removes the subscription. Does nothing if the hub has already been dropped.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).subscribers.remove(&self.id);
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe").field("id", &self.id).finish()
    }
}

fn lock(registry: &Mutex<Registry>) -> std::sync::MutexGuard<'_, Registry> {
    // A panicking handler never runs under the lock, so poisoning carries no broken state.
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    type Events = Arc<Mutex<Vec<DiagnosticEvent>>>;

    fn collector(hub: &DiagnosticsHub, min_level: DiagnosticLevel) -> (Events, Unsubscribe) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let handle = hub.subscribe(
            move |event| sink.lock().unwrap().push(event.clone()),
            min_level,
        );
        (events, handle)
    }

    #[test]
    fn test_threshold_filters_events() {
        let hub = DiagnosticsHub::new("test");
        let (warnings, _w) = collector(&hub, DiagnosticLevel::Warning);
        let (everything, _e) = collector(&hub, DiagnosticLevel::Debug);

        hub.debug("noise");
        hub.warning("missing column");
        hub.error("broken");

        let warnings = warnings.lock().unwrap();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].message, "missing column");
        assert_eq!(warnings[0].level, DiagnosticLevel::Warning);
        assert_eq!(warnings[0].source, "test");
        assert_eq!(everything.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_events_carry_hub_source() {
        let hub = DiagnosticsHub::new("pgclient::Test");
        assert_eq!(hub.source(), "pgclient::Test");
        let (events, _handle) = collector(&hub, DiagnosticLevel::Debug);
        hub.debug("hello");
        assert_eq!(events.lock().unwrap()[0].source, hub.source());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = DiagnosticsHub::new("test");
        let (events, handle) = collector(&hub, DiagnosticLevel::Debug);
        let (kept, _k) = collector(&hub, DiagnosticLevel::Debug);

        hub.info("first");
        handle.unsubscribe();
        hub.info("second");

        assert_eq!(events.lock().unwrap().len(), 1);
        assert_eq!(kept.lock().unwrap().len(), 2);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_after_hub_dropped() {
        let hub = DiagnosticsHub::new("test");
        let (_events, handle) = collector(&hub, DiagnosticLevel::Debug);
        drop(hub);
        handle.unsubscribe();
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let hub = Arc::new(DiagnosticsHub::new("test"));
        let inner = Arc::clone(&hub);
        let _handle = hub.subscribe(
            move |_| {
                let _nested = inner.subscribe(|_| {}, DiagnosticLevel::Error);
            },
            DiagnosticLevel::Debug,
        );
        hub.info("trigger");
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn test_level_ordering() {
        assert!(DiagnosticLevel::Debug < DiagnosticLevel::Info);
        assert!(DiagnosticLevel::Info < DiagnosticLevel::Warning);
        assert!(DiagnosticLevel::Warning < DiagnosticLevel::Error);
        assert_eq!(DiagnosticLevel::Warning.to_string(), "warning");
    }
}

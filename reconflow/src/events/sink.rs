//! Event sink trait and implementations.

use super::LifecycleEvent;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn, Level};

/// Receives lifecycle events.
///
/// `emit` must never fail or block for long; it is called inline from the
/// reconciler and from stage tasks.
pub trait EventSink: Send + Sync {
    /// Records an event.
    fn emit(&self, event: &LifecycleEvent);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &LifecycleEvent) {}
}

/// A sink that logs events through `tracing`.
///
/// Failures are logged at `error`, skips and replacements at `warn`, and
/// everything else at the configured level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink with the given base level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &LifecycleEvent) {
        let name = event.name();
        let resource = event.resource().map(ToString::to_string);
        let resource = resource.as_deref();
        let stage = event.stage();
        match event {
            LifecycleEvent::StageFailed { kind, detail, .. } => {
                error!(event = name, stage, %kind, detail = %detail, "Stage failed");
            }
            LifecycleEvent::StageSkipped { reason, .. } => {
                warn!(event = name, stage, reason = %reason, "Stage skipped");
            }
            LifecycleEvent::DeleteIssued { .. } => {
                warn!(event = name, resource, "Deleting resource");
            }
            _ if self.level == Level::DEBUG => {
                debug!(event = name, stage, resource, ?event, "Lifecycle event");
            }
            _ => {
                info!(event = name, stage, resource, "Lifecycle event");
            }
        }
    }
}

/// A sink that stores events in memory, for tests and reports.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<LifecycleEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns the dotted names of events matching a prefix.
    #[must_use]
    pub fn names_with_prefix(&self, prefix: &str) -> Vec<&'static str> {
        self.events
            .read()
            .iter()
            .map(LifecycleEvent::name)
            .filter(|name| name.starts_with(prefix))
            .collect()
    }

    /// Returns the position of the first event matching `predicate`.
    #[must_use]
    pub fn position(&self, predicate: impl Fn(&LifecycleEvent) -> bool) -> Option<usize> {
        self.events.read().iter().position(predicate)
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &LifecycleEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Phase, ResourceRef, ResourceType};
    use crate::errors::ErrorKind;

    fn fg() -> ResourceRef {
        ResourceRef::new(ResourceType::FeatureGroup, "fg")
    }

    #[test]
    fn test_noop_and_logging_sinks_accept_events() {
        let events = [
            LifecycleEvent::DeleteIssued { resource: fg() },
            LifecycleEvent::StageFailed {
                stage: "train".into(),
                kind: ErrorKind::CreateFailed,
                detail: "capacity".into(),
            },
            LifecycleEvent::Settled { resource: fg(), phase: Phase::Active },
        ];
        for event in &events {
            NoOpEventSink.emit(event);
            LoggingEventSink::default().emit(event);
            LoggingEventSink::debug().emit(event);
        }
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&LifecycleEvent::StageStarted { stage: "features".into() });
        sink.emit(&LifecycleEvent::CreateIssued { resource: fg() });
        sink.emit(&LifecycleEvent::Settled { resource: fg(), phase: Phase::Active });

        assert_eq!(sink.len(), 3);
        assert_eq!(
            sink.names_with_prefix("resource."),
            vec!["resource.create_issued", "resource.settled"]
        );
        assert_eq!(
            sink.position(|e| matches!(e, LifecycleEvent::CreateIssued { .. })),
            Some(1)
        );

        sink.clear();
        assert!(sink.is_empty());
    }
}

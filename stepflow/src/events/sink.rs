//! Event sink trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info, warn, Level};

use super::StepEvent;

/// Receiver of executor lifecycle events.
///
/// Sinks must not fail the run: errors are logged and suppressed.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &StepEvent);

    /// Emits an event without awaiting.
    fn try_emit(&self, event: &StepEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &StepEvent) {}

    fn try_emit(&self, _event: &StepEvent) {}
}

/// An event sink that logs events using the tracing framework.
///
/// Step failures are always logged at warn level.
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
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn log_event(&self, event: &StepEvent) {
        let event_type = event.event_type();
        let step = event.step().unwrap_or("-");
        let data = match serde_json::to_string(event) {
            Ok(data) => data,
            Err(e) => {
                warn!(event_type, error = %e, "Failed to serialize event");
                return;
            }
        };

        if matches!(event, StepEvent::StepFailed { .. }) {
            warn!(event_type, step, event_data = %data, "Event: {}", event_type);
        } else if self.level == Level::DEBUG {
            debug!(event_type, step, event_data = %data, "Event: {}", event_type);
        } else {
            info!(event_type, step, event_data = %data, "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &StepEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &StepEvent) {
        self.log_event(event);
    }
}

/// An event sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<StepEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<StepEvent> {
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

    /// Returns events whose type starts with a prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<StepEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the event types emitted for one step, in order.
    #[must_use]
    pub fn types_for_step(&self, step: &str) -> Vec<&'static str> {
        self.events
            .read()
            .iter()
            .filter(|e| e.step() == Some(step))
            .map(StepEvent::event_type)
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &StepEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &StepEvent) {
        self.events.write().push(event.clone());
    }
}

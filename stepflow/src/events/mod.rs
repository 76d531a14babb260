//! Step lifecycle events.
//!
//! The executor emits a [`StepEvent`] for every state change of a run and
//! of each step. Sinks are passed to the executor explicitly; there is no
//! process-wide sink.

mod event;
mod sink;

pub use event::StepEvent;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

//! Observability utilities.
//!
//! The crate logs through `tracing`. Binaries and tests that want to see
//! those logs install a subscriber with [`init_tracing`].

mod subscriber;
mod timer;

pub use subscriber::{init_tracing, LogFormat, DEFAULT_FILTER};
pub use timer::SpanTimer;

//! Cooperative cancellation of executor invocations.

mod token;

pub use token::{CancelCallback, CancellationToken};

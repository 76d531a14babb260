use std::sync::Arc;
use uuid::Uuid;

use crate::cancellation::CancellationToken;

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Token observed by every step of the invocation.
    pub cancel: Arc<CancellationToken>,
    /// Invocation id. A fresh one is generated when unset.
    pub run_id: Option<Uuid>,
}

impl RunOptions {
    /// Creates options with a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses an existing cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fixes the invocation id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

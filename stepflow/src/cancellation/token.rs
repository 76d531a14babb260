//! Cancellation token for cooperative cancellation.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn Fn() + Send + Sync>;

/// A token for cooperative cancellation of an invocation.
///
/// The executor races in-flight step runs against [`cancelled`](Self::cancelled);
/// step bodies can also poll [`is_cancelled`](Self::is_cancelled) through
/// their context. Cancellation is idempotent: only the first reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: RwLock<Vec<CancelCallback>>,
    /// Live children; dropped ones are pruned whenever a child is added.
    children: Mutex<Vec<Weak<CancellationToken>>>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// Callbacks run immediately on the calling thread; panics inside them
    /// are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let reason = reason.into();
        *self.reason.write() = Some(reason.clone());
        self.notify.notify_waiters();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(reason.clone());
        }

        let callbacks = self.callbacks.read();
        for callback in callbacks.iter() {
            run_callback(callback.as_ref());
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.write();
        if self.is_cancelled() {
            drop(callbacks);
            run_callback(&callback);
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Creates a token that is cancelled, with the same reason, whenever
    /// this one is. Cancelling the child leaves the parent untouched.
    ///
    /// The parent only holds a weak reference to the child, and forgets
    /// children that have been dropped.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(Self::new());
        let mut children = self.children.lock();
        // Checked under the lock: `cancel` sets the flag before draining.
        if self.is_cancelled() {
            drop(children);
            child.cancel(self.reason().unwrap_or_else(|| "cancelled".to_string()));
            return child;
        }
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child));
        drop(children);
        child
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn run_callback(callback: &(dyn Fn() + Send + Sync)) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

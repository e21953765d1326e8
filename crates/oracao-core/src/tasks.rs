//! Completion tracking for in-flight events and background work.
//!
//! Every event the worker handles and every background refresh it spawns
//! holds a `WorkGuard` until it settles. A host that wants to shut down
//! cleanly calls `flush()`, which resolves once no guard is outstanding.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    pending: AtomicUsize,
    idle: Notify,
}

/// Clone is cheap - all clones share one counter.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
}

/// Keeps its tracker busy until dropped.
#[derive(Debug)]
pub struct WorkGuard {
    inner: Arc<Inner>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if self.inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the tracker open for the lifetime of the returned guard.
    pub fn hold(&self) -> WorkGuard {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        WorkGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Spawn a task on the tokio runtime; it counts as pending until it
    /// completes (or panics).
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.hold();
        tokio::spawn(async move {
            let _guard = guard;
            task.await;
        });
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Wait until nothing is pending.
    pub async fn flush(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a guard dropped in between still wakes us
            notified.as_mut().enable();

            let pending = self.pending();
            if pending == 0 {
                return;
            }
            debug!(pending, "Waiting for background tasks");
            notified.await;
        }
    }
}

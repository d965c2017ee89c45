use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Counts outstanding directory and file tasks for one run.
///
/// A slot is claimed with [`CompletionTracker::track`] *before* the task is
/// spawned, so the count can never reach zero while a parent is still
/// dispatching children. Dropping the returned guard retires the slot, which
/// also covers early returns and panics inside the task.
#[derive(Clone, Default)]
pub struct CompletionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    outstanding: AtomicUsize,
    notify: Notify,
}

/// Retires one tracked task when dropped.
#[must_use = "dropping the guard retires the task immediately"]
pub struct TaskGuard {
    inner: Arc<TrackerInner>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self) -> TaskGuard {
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Resolve once every tracked task has retired.
    pub async fn wait(&self) {
        loop {
            // Register before checking so a retirement between the check and
            // the await is not lost.
            let notified = self.inner.notify.notified();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

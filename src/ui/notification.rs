//! Cancellable notifications scheduled onto the UI thread.
//!
//! Each scheduled task carries a validity flag. The flag moves from `PENDING`
//! to either `RAN` (the task body executed) or `CANCELLED` (the body will be
//! skipped), exactly once. A [`NotificationSet`] remembers every flag it
//! handed out so a model that is reset can cancel all of its in-flight work in
//! one call, whether or not the thread that scheduled it has noticed anything.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::ui::event_loop::UiHandle;

const PENDING: u8 = 0;
const RAN: u8 = 1;
const CANCELLED: u8 = 2;

/// Handle to one scheduled task.
#[derive(Debug, Clone)]
pub struct ScheduledNotification {
    state: Arc<AtomicU8>,
}

impl ScheduledNotification {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// Prevent the task body from running. Returns `false` if it already ran
    /// or was already cancelled.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Claim the right to run. Only the first claim on a pending flag wins.
    fn claim(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RAN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// The notifications one owner has scheduled and not yet seen run.
pub struct NotificationSet {
    ui: UiHandle,
    outstanding: Mutex<Vec<ScheduledNotification>>,
    cancelled: AtomicU64,
}

impl NotificationSet {
    #[must_use]
    pub fn new(ui: UiHandle) -> Self {
        Self {
            ui,
            outstanding: Mutex::new(Vec::new()),
            cancelled: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn ui(&self) -> &UiHandle {
        &self.ui
    }

    /// Post `task` to the UI thread behind a fresh validity flag.
    pub fn schedule<F>(&self, task: F) -> ScheduledNotification
    where
        F: FnOnce() + Send + 'static,
    {
        let note = ScheduledNotification::new();
        {
            let mut outstanding = self.outstanding.lock();
            outstanding.retain(ScheduledNotification::is_pending);
            outstanding.push(note.clone());
        }
        let flag = note.clone();
        if !self.ui.post(move || {
            if flag.claim() {
                task();
            }
        }) {
            note.cancel();
        }
        note
    }

    /// Cancel everything still pending. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<ScheduledNotification> = std::mem::take(&mut *self.outstanding.lock());
        let count = drained.iter().filter(|n| n.cancel()).count();
        self.cancelled.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Notifications scheduled and neither run nor cancelled.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
            .lock()
            .iter()
            .filter(|n| n.is_pending())
            .count()
    }

    /// Total cancelled over the set's lifetime.
    #[must_use]
    pub fn total_cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::event_loop::UiLoop;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn scheduled_task_runs_once() {
        let ui = UiLoop::new();
        let set = NotificationSet::new(ui.handle());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let note = set.schedule(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(note.is_pending());
        assert_eq!(set.outstanding(), 1);

        ui.run_pending();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!note.is_pending());
        assert!(!note.cancel());
        assert_eq!(set.outstanding(), 0);
    }

    #[test]
    fn cancelled_task_is_a_noop_when_delivered() {
        let ui = UiLoop::new();
        let set = NotificationSet::new(ui.handle());
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let h = Arc::clone(&hits);
            set.schedule(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(set.cancel_all(), 3);
        assert_eq!(set.cancel_all(), 0);

        // The queued closures still run, but find their flag cancelled.
        assert_eq!(ui.run_pending(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(set.total_cancelled(), 3);
    }

    #[test]
    fn single_cancel_leaves_siblings_alone() {
        let ui = UiLoop::new();
        let set = NotificationSet::new(ui.handle());
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = Arc::clone(&hits);
        let first = set.schedule(move || {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = Arc::clone(&hits);
        set.schedule(move || {
            h2.fetch_add(10, Ordering::SeqCst);
        });
        assert!(first.cancel());
        assert!(first.is_cancelled());
        ui.run_pending();
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }
}

//! The single UI-thread task queue.
//!
//! Models bound to widgets may only be mutated on one thread. Everything that
//! needs to touch them from elsewhere is posted here as a task and runs later,
//! in posting order, on the thread that owns the [`UiLoop`].

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cheap, clonable handle for posting work to the UI thread.
#[derive(Clone)]
pub struct UiHandle {
    tx: Sender<Task>,
    owner: ThreadId,
    posted: Arc<AtomicU64>,
}

impl std::fmt::Debug for UiHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiHandle")
            .field("owner", &self.owner)
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl UiHandle {
    /// Queue `task` behind everything already posted. Never blocks.
    ///
    /// Returns `false` when the loop is gone; the task is dropped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let ok = self.tx.send(Box::new(task)).is_ok();
        if ok {
            self.posted.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Whether the calling thread is the UI thread.
    #[must_use]
    pub fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Panic unless called on the UI thread. Off-thread mutation of a bound
    /// model is a logic defect, not a runtime condition.
    #[track_caller]
    pub fn assert_ui_thread(&self, operation: &str) {
        assert!(
            self.is_ui_thread(),
            "{operation} must run on the UI thread (called from {:?})",
            thread::current().name().unwrap_or("<unnamed>")
        );
    }

    /// Tasks posted and not yet run.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// Tasks posted over the lifetime of the loop.
    #[must_use]
    pub fn total_posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }
}

/// Consumer side of the queue, bound to the thread that created it.
pub struct UiLoop {
    rx: Receiver<Task>,
    handle: UiHandle,
}

impl Default for UiLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl UiLoop {
    /// Create a loop owned by the calling thread.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            rx,
            handle: UiHandle {
                tx,
                owner: thread::current().id(),
                posted: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    #[must_use]
    pub fn handle(&self) -> UiHandle {
        self.handle.clone()
    }

    /// Run the oldest queued task, if any.
    pub fn run_next(&self) -> bool {
        self.handle.assert_ui_thread("UiLoop::run_next");
        match self.rx.try_recv() {
            Ok(task) => {
                task();
                true
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks posted by the tasks
    /// themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Run tasks as they arrive until `timeout` elapses.
    pub fn run_for(&self, timeout: Duration) -> usize {
        self.handle.assert_ui_thread("UiLoop::run_for");
        let deadline = Instant::now() + timeout;
        let mut ran = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ran;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return ran,
            }
        }
    }

    /// Tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

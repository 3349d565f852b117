//! Two-stage commit buffer.
//!
//! Producers (a scan worker, cache observer callbacks, or the UI thread
//! itself) append to a pending queue under the buffer lock and return
//! immediately. A go-live task on the UI thread later moves pending work into
//! the live store, which is the only sequence widgets ever read.
//!
//! Invariants:
//! - at most one go-live task is scheduled per buffer at any time;
//! - within one go-live pass, removals are applied before additions, and an
//!   identity removed in the pass is never (re)inserted by the same pass;
//! - at most `batch_size` additions are promoted per pass, one coalesced
//!   insert event per pass;
//! - after [`CommitBuffer::reset`], nothing scheduled before the reset can
//!   touch the live store, and enqueues tagged with an older epoch are
//!   refused.

#![allow(missing_docs)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::lock_order::{LockLevel, OrderedMutex};
use crate::logger::journal::{JournalEvent, JournalHandle};
use crate::results::outcome::{Category, TestRef};
use crate::ui::event_loop::UiHandle;
use crate::ui::notification::NotificationSet;
use crate::ui::table::{ListenerList, TableEvent, TableListener};

/// Default number of additions promoted per go-live pass.
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Default)]
struct PendingQueue {
    to_add: VecDeque<TestRef>,
    to_remove: Vec<TestRef>,
    go_live_outstanding: bool,
    epoch: u64,
}

#[derive(Debug, Default)]
struct Counters {
    adds: AtomicU64,
    removes: AtomicU64,
    refused: AtomicU64,
    drains: AtomicU64,
    go_lives_scheduled: AtomicU64,
}

/// Counter snapshot for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub enqueued_adds: u64,
    pub enqueued_removes: u64,
    /// Enqueues dropped because they carried a pre-reset epoch.
    pub refused: u64,
    /// Go-live passes that actually ran.
    pub drains: u64,
    pub go_lives_scheduled: u64,
    pub cancelled_notifications: u64,
}

/// Producer/consumer buffer in front of one UI-owned row store.
pub struct CommitBuffer {
    category: Category,
    batch_size: usize,
    pending: OrderedMutex<PendingQueue>,
    /// UI thread only. Leaf lock; never held while firing listeners.
    live: Mutex<Vec<TestRef>>,
    notifications: NotificationSet,
    listeners: ListenerList,
    counters: Counters,
    journal: JournalHandle,
    me: Weak<Self>,
}

impl CommitBuffer {
    pub fn new(
        category: Category,
        ui: UiHandle,
        batch_size: usize,
        journal: JournalHandle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            category,
            batch_size: batch_size.max(1),
            pending: OrderedMutex::new(LockLevel::Buffer, PendingQueue::default()),
            live: Mutex::new(Vec::new()),
            notifications: NotificationSet::new(ui),
            listeners: ListenerList::default(),
            counters: Counters::default(),
            journal,
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Generation counter bumped by every reset.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.pending.lock().epoch
    }

    pub fn add_listener(&self, listener: Arc<dyn TableListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn TableListener>) -> bool {
        self.listeners.remove(listener)
    }

    // ──────────────────── producer side ────────────────────

    /// Queue `test` for insertion. Unless `suppress_notify`, make sure a
    /// go-live is scheduled.
    pub fn enqueue_add(&self, test: TestRef, suppress_notify: bool) {
        let mut q = self.pending.lock();
        self.push_add(&mut q, test, suppress_notify);
    }

    /// Like [`enqueue_add`](Self::enqueue_add), but refused when the buffer
    /// has been reset since `epoch` was read.
    pub fn enqueue_add_in(&self, epoch: u64, test: TestRef, suppress_notify: bool) -> bool {
        let mut q = self.pending.lock();
        if q.epoch != epoch {
            self.counters.refused.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.push_add(&mut q, test, suppress_notify);
        true
    }

    /// Queue `test` for deletion and make sure a go-live is scheduled.
    pub fn enqueue_remove(&self, test: TestRef) {
        let mut q = self.pending.lock();
        self.push_remove(&mut q, test);
    }

    pub fn enqueue_remove_in(&self, epoch: u64, test: TestRef) -> bool {
        let mut q = self.pending.lock();
        if q.epoch != epoch {
            self.counters.refused.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.push_remove(&mut q, test);
        true
    }

    /// Schedule a go-live for work queued with notification suppressed.
    pub fn flush(&self) {
        let mut q = self.pending.lock();
        if !q.go_live_outstanding && (!q.to_add.is_empty() || !q.to_remove.is_empty()) {
            self.schedule_go_live(&mut q);
        }
    }

    fn push_add(&self, q: &mut PendingQueue, test: TestRef, suppress_notify: bool) {
        q.to_add.push_back(test);
        self.counters.adds.fetch_add(1, Ordering::Relaxed);
        if !suppress_notify && !q.go_live_outstanding {
            self.schedule_go_live(q);
        }
    }

    fn push_remove(&self, q: &mut PendingQueue, test: TestRef) {
        q.to_remove.push(test);
        self.counters.removes.fetch_add(1, Ordering::Relaxed);
        if !q.go_live_outstanding {
            self.schedule_go_live(q);
        }
    }

    /// Caller holds the buffer lock and has checked the outstanding flag.
    fn schedule_go_live(&self, q: &mut PendingQueue) {
        q.go_live_outstanding = true;
        self.counters
            .go_lives_scheduled
            .fetch_add(1, Ordering::Relaxed);
        let me = self.me.clone();
        self.notifications.schedule(move || {
            if let Some(buffer) = me.upgrade() {
                buffer.go_live();
            }
        });
    }

    // ──────────────────── UI side ────────────────────

    /// Drain pending work into the live store. Runs only as a scheduled
    /// notification on the UI thread.
    fn go_live(&self) {
        self.notifications.ui().assert_ui_thread("CommitBuffer::go_live");

        let mut events = Vec::new();
        let (removed_rows, inserted, remaining) = {
            let mut q = self.pending.lock();
            q.go_live_outstanding = false;

            let removals = std::mem::take(&mut q.to_remove);
            let mut live = self.live.lock();
            let mut removed_ids: HashSet<TestRef> = HashSet::with_capacity(removals.len());
            let mut removed_rows = 0;
            for test in removals {
                // A second removal source may already have taken it.
                if let Some(row) = live.iter().position(|t| *t == test) {
                    live.remove(row);
                    removed_rows += 1;
                    events.push(TableEvent::RowsDeleted {
                        first: row,
                        last: row,
                    });
                }
                removed_ids.insert(test);
            }
            if !removed_ids.is_empty() {
                q.to_add.retain(|t| !removed_ids.contains(t));
            }

            let take = q.to_add.len().min(self.batch_size);
            if take > 0 {
                let first = live.len();
                live.extend(q.to_add.drain(..take));
                events.push(TableEvent::RowsInserted {
                    first,
                    last: live.len() - 1,
                });
            }
            drop(live);

            let remaining = q.to_add.len();
            if remaining > 0 || !q.to_remove.is_empty() {
                self.schedule_go_live(&mut q);
            }
            (removed_rows, take, remaining)
        };

        self.counters.drains.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            category = %self.category,
            removed = removed_rows,
            inserted,
            remaining,
            "go-live pass"
        );
        if removed_rows > 0 || inserted > 0 {
            self.journal.send(JournalEvent::BatchApplied {
                category: self.category,
                removed: removed_rows,
                inserted,
                remaining,
            });
        }
        for event in &events {
            self.listeners.fire(event);
        }
    }

    /// Cancel scheduled go-lives, empty both queues and the live store, and
    /// tell widgets everything changed. Returns how many notifications were
    /// cancelled.
    pub fn reset(&self) -> usize {
        self.notifications.ui().assert_ui_thread("CommitBuffer::reset");
        let cancelled = self.notifications.cancel_all();
        {
            let mut q = self.pending.lock();
            q.to_add.clear();
            q.to_remove.clear();
            q.go_live_outstanding = false;
            q.epoch += 1;
            self.live.lock().clear();
        }
        tracing::debug!(category = %self.category, cancelled, "buffer reset");
        self.listeners.fire(&TableEvent::DataChanged);
        cancelled
    }

    // ──────────────────── reads ────────────────────

    /// Rows currently visible.
    #[must_use]
    pub fn live_len(&self) -> usize {
        debug_assert!(self.notifications.ui().is_ui_thread());
        self.live.lock().len()
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<TestRef> {
        debug_assert!(self.notifications.ui().is_ui_thread());
        self.live.lock().get(index).cloned()
    }

    #[must_use]
    pub fn live_rows(&self) -> Vec<TestRef> {
        debug_assert!(self.notifications.ui().is_ui_thread());
        self.live.lock().clone()
    }

    /// `(pending additions, pending removals)`.
    #[must_use]
    pub fn pending_len(&self) -> (usize, usize) {
        let q = self.pending.lock();
        (q.to_add.len(), q.to_remove.len())
    }

    /// Go-live tasks scheduled and not yet run or cancelled. Never above 1.
    #[must_use]
    pub fn outstanding_go_lives(&self) -> usize {
        self.notifications.outstanding()
    }

    #[must_use]
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            enqueued_adds: self.counters.adds.load(Ordering::Relaxed),
            enqueued_removes: self.counters.removes.load(Ordering::Relaxed),
            refused: self.counters.refused.load(Ordering::Relaxed),
            drains: self.counters.drains.load(Ordering::Relaxed),
            go_lives_scheduled: self.counters.go_lives_scheduled.load(Ordering::Relaxed),
            cancelled_notifications: self.notifications.total_cancelled(),
        }
    }
}

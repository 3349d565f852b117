//! Per-category table model bound to at most one NodeCache.
//!
//! The model owns a [`CommitBuffer`] (the rows widgets see) and an
//! [`EnableSignal`] (whether its tab is clickable). It reaches the cache in
//! two ways: a synchronizer calls [`ScanTarget::attach`] from inside the
//! cache critical section to register and collect the snapshot, and the
//! registered [`ModelObserver`] forwards every later delta.
//!
//! Locks: cache, then the binding lock here, then the buffer. The binding
//! lock is never held while reaching for the cache.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::lock_order::{LockLevel, OrderedMutex};
use crate::logger::journal::{JournalEvent, JournalHandle};
use crate::results::node_cache::{CacheGuard, CacheObserver, NodeCache, ObserverId};
use crate::results::outcome::{Category, Stats, TestOutcomeEvent, TestRef};
use crate::sync::buffer::{BufferStats, CommitBuffer};
use crate::sync::synchronizer::{Attachment, ScanTarget};
use crate::ui::event_loop::UiHandle;
use crate::ui::table::{TableListener, TableModel};
use crate::view::enable::{EnableSignal, EnabledListener};

/// Shown in the reason column when the cache has no reason for a test.
pub const NO_REASON: &str = "no information available";
/// Placeholder for an empty filtered-out table.
pub const EMPTY_FILTERED: &str = "no filter reason available";
/// Placeholder for an empty status table.
pub const EMPTY_STATUS: &str = "no tests";

pub const COLUMN_TEST: usize = 0;
pub const COLUMN_DETAIL: usize = 1;

// ──────────────────── observer ────────────────────

/// The model's cache registration. Outlives its usefulness whenever the model
/// is reset; `valid` turns late callbacks into no-ops.
pub struct ModelObserver {
    category: Category,
    epoch: u64,
    valid: AtomicBool,
    buffer: Arc<CommitBuffer>,
    enable: Arc<EnableSignal>,
}

impl ModelObserver {
    fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

impl CacheObserver for ModelObserver {
    fn test_added(&self, event: &TestOutcomeEvent) {
        if event.category != self.category || !self.is_valid() {
            return;
        }
        self.buffer
            .enqueue_add_in(self.epoch, event.test.clone(), false);
    }

    fn test_removed(&self, event: &TestOutcomeEvent) {
        if event.category != self.category || !self.is_valid() {
            return;
        }
        self.buffer.enqueue_remove_in(self.epoch, event.test.clone());
    }

    fn stats_updated(&self, stats: &Stats) {
        if self.is_valid() {
            self.enable.request(stats.count(self.category));
        }
    }
}

// ──────────────────── model ────────────────────

#[derive(Default)]
struct Binding {
    cache: Option<Arc<NodeCache>>,
    observer: Option<Arc<ModelObserver>>,
    observer_id: Option<ObserverId>,
}

pub struct CategoryViewModel {
    category: Category,
    ui: UiHandle,
    buffer: Arc<CommitBuffer>,
    enable: Arc<EnableSignal>,
    binding: OrderedMutex<Binding>,
    journal: JournalHandle,
}

impl std::fmt::Debug for CategoryViewModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryViewModel")
            .field("category", &self.category)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl CategoryViewModel {
    pub fn new(
        category: Category,
        ui: UiHandle,
        batch_size: usize,
        journal: JournalHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            category,
            buffer: CommitBuffer::new(category, ui.clone(), batch_size, journal.clone()),
            enable: EnableSignal::new(category, ui.clone(), journal.clone()),
            ui,
            binding: OrderedMutex::new(LockLevel::Model, Binding::default()),
            journal,
        })
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    /// Cache currently bound, if any.
    #[must_use]
    pub fn cache(&self) -> Option<Arc<NodeCache>> {
        self.binding.lock().cache.clone()
    }

    /// Whether a synchronizer has registered this model with its cache.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.binding.lock().observer_id.is_some()
    }

    /// Detach from the current cache, bind `cache` (or nothing) and empty the
    /// table. The model stays visually empty and disabled until a
    /// synchronizer attaches it. UI thread only.
    pub fn reset(&self, cache: Option<Arc<NodeCache>>) {
        self.ui.assert_ui_thread("CategoryViewModel::reset");
        self.detach();

        let cancelled = self.buffer.reset() + self.enable.reset();
        let node = cache.as_ref().map(|c| c.node().to_string());
        self.binding.lock().cache = cache;

        tracing::debug!(category = %self.category, node = ?node, cancelled, "model reset");
        self.journal.send(JournalEvent::ModelReset {
            category: self.category,
            node,
            cancelled,
        });
    }

    /// Unregister from the bound cache and forget it. Rows already live stay
    /// until the next [`reset`](Self::reset). Safe off the UI thread, so an
    /// owner being dropped anywhere can release its registration.
    pub fn detach(&self) {
        let old = self.binding.lock().cache.clone();
        let Some(old) = old else {
            return;
        };
        let mut cache_guard = old.lock();
        let mut binding = self.binding.lock();
        if let Some(id) = binding.observer_id.take() {
            cache_guard.remove_observer(id);
        }
        if let Some(observer) = binding.observer.take() {
            observer.invalidate();
        }
        binding.cache = None;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enable.is_enabled()
    }

    pub fn on_enabled_changed(&self, listener: EnabledListener) {
        self.enable.add_listener(listener);
    }

    pub fn add_listener(&self, listener: Arc<dyn TableListener>) {
        self.buffer.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn TableListener>) -> bool {
        self.buffer.remove_listener(listener)
    }

    /// Text a widget shows instead of rows while the model is empty.
    #[must_use]
    pub fn empty_text(&self) -> &'static str {
        if self.category == Category::Filtered {
            EMPTY_FILTERED
        } else {
            EMPTY_STATUS
        }
    }

    /// Test shown at `row`. UI thread.
    #[must_use]
    pub fn test_at(&self, row: usize) -> Option<TestRef> {
        self.buffer.row(row)
    }

    #[must_use]
    pub fn rows(&self) -> Vec<TestRef> {
        self.buffer.live_rows()
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<CommitBuffer> {
        &self.buffer
    }

    #[must_use]
    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    fn reason_for(&self, test: &TestRef) -> String {
        // Clone out of the binding lock before touching the cache lock.
        let cache = self.binding.lock().cache.clone();
        cache
            .and_then(|c| c.reject_reason(test))
            .unwrap_or_else(|| NO_REASON.to_string())
    }
}

impl ScanTarget for CategoryViewModel {
    fn category(&self) -> Category {
        self.category
    }

    fn attach(&self, guard: &mut CacheGuard<'_>) -> Option<Attachment> {
        let mut binding = self.binding.lock();
        let bound_here = binding
            .cache
            .as_ref()
            .is_some_and(|c| std::ptr::eq(Arc::as_ptr(c), guard.cache()));
        if !bound_here || binding.observer_id.is_some() {
            return None;
        }

        let epoch = self.buffer.epoch();
        let observer = Arc::new(ModelObserver {
            category: self.category,
            epoch,
            valid: AtomicBool::new(true),
            buffer: Arc::clone(&self.buffer),
            enable: Arc::clone(&self.enable),
        });
        let mut registration = guard.add_observer(observer.clone(), true);
        binding.observer_id = Some(registration.id);
        binding.observer = Some(observer);
        drop(binding);

        self.enable
            .request(registration.stats.count(self.category));
        Some(Attachment {
            bucket: registration.snapshot.take(self.category),
            epoch,
            buffer: Arc::clone(&self.buffer),
        })
    }
}

impl TableModel for CategoryViewModel {
    fn row_count(&self) -> usize {
        self.buffer.live_len()
    }

    fn column_count(&self) -> usize {
        2
    }

    fn column_name(&self, column: usize) -> &'static str {
        match column {
            COLUMN_TEST => "Test",
            COLUMN_DETAIL if self.category == Category::Filtered => "Reason",
            COLUMN_DETAIL => "Status",
            other => panic!("{} model has no column {other}", self.category),
        }
    }

    fn value_at(&self, row: usize, column: usize) -> String {
        assert!(
            column < self.column_count(),
            "{} model has no column {column}",
            self.category
        );
        let Some(test) = self.buffer.row(row) else {
            panic!("{} model has no row {row}", self.category);
        };
        match column {
            COLUMN_TEST => test.name().to_string(),
            _ if self.category == Category::Filtered => self.reason_for(&test),
            _ => test.status_message().to_string(),
        }
    }
}

//! Always-enabled summary tab: one row per category with its current count.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::lock_order::{LockLevel, OrderedMutex};
use crate::results::node_cache::{CacheObserver, NodeCache, ObserverId};
use crate::results::outcome::{Category, Stats, TestOutcomeEvent};
use crate::ui::event_loop::UiHandle;
use crate::ui::notification::NotificationSet;
use crate::ui::table::{ListenerList, TableEvent, TableListener, TableModel};

#[derive(Default)]
struct SummaryBinding {
    cache: Option<Arc<NodeCache>>,
    observer_id: Option<ObserverId>,
}

pub struct SummaryModel {
    ui: UiHandle,
    binding: OrderedMutex<SummaryBinding>,
    /// Bumped on every reset and detach; observers and refreshes from an older
    /// generation are ignored.
    generation: AtomicU64,
    /// Latest stats reported by the cache, any thread.
    latest: Mutex<Stats>,
    /// Stats the table shows. UI thread only.
    shown: Mutex<Stats>,
    refresh_pending: AtomicBool,
    notifications: NotificationSet,
    listeners: ListenerList,
    me: Weak<Self>,
}

struct SummaryObserver {
    model: Weak<SummaryModel>,
    generation: u64,
}

impl CacheObserver for SummaryObserver {
    fn test_added(&self, _: &TestOutcomeEvent) {}

    fn test_removed(&self, _: &TestOutcomeEvent) {}

    fn stats_updated(&self, stats: &Stats) {
        if let Some(model) = self.model.upgrade() {
            model.post_stats(self.generation, *stats);
        }
    }
}

impl SummaryModel {
    #[must_use]
    pub fn new(ui: UiHandle) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            notifications: NotificationSet::new(ui.clone()),
            ui,
            binding: OrderedMutex::new(LockLevel::Model, SummaryBinding::default()),
            generation: AtomicU64::new(0),
            latest: Mutex::new(Stats::default()),
            shown: Mutex::new(Stats::default()),
            refresh_pending: AtomicBool::new(false),
            listeners: ListenerList::default(),
            me: me.clone(),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn TableListener>) {
        self.listeners.add(listener);
    }

    /// Stats currently on screen.
    #[must_use]
    pub fn stats(&self) -> Stats {
        *self.shown.lock()
    }

    /// Rebind to `cache` (or nothing). The summary registers without a
    /// snapshot and seeds itself from the registration stats. UI thread.
    pub fn reset(&self, cache: Option<Arc<NodeCache>>) {
        self.ui.assert_ui_thread("SummaryModel::reset");
        self.detach();

        let generation = self.generation.load(Ordering::Acquire);
        self.notifications.cancel_all();
        self.refresh_pending.store(false, Ordering::Release);

        let initial = match &cache {
            Some(cache) => {
                let mut cache_guard = cache.lock();
                let mut binding = self.binding.lock();
                let observer = Arc::new(SummaryObserver {
                    model: self.me.clone(),
                    generation,
                });
                let registration = cache_guard.add_observer(observer, false);
                binding.observer_id = Some(registration.id);
                binding.cache = Some(Arc::clone(cache));
                registration.stats
            }
            None => Stats::default(),
        };
        *self.latest.lock() = initial;
        *self.shown.lock() = initial;
        self.listeners.fire(&TableEvent::DataChanged);
    }

    /// Unregister from the bound cache and ignore any refresh still in
    /// flight. Safe off the UI thread.
    pub fn detach(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let old = self.binding.lock().cache.clone();
        let Some(old) = old else {
            return;
        };
        let mut cache_guard = old.lock();
        let mut binding = self.binding.lock();
        if let Some(id) = binding.observer_id.take() {
            cache_guard.remove_observer(id);
        }
        binding.cache = None;
    }

    fn post_stats(&self, generation: u64, stats: Stats) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        *self.latest.lock() = stats;
        if self.refresh_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let me = self.me.clone();
        self.notifications.schedule(move || {
            if let Some(model) = me.upgrade() {
                model.refresh(generation);
            }
        });
    }

    fn refresh(&self, generation: u64) {
        self.ui.assert_ui_thread("SummaryModel::refresh");
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        self.refresh_pending.store(false, Ordering::Release);
        let latest = *self.latest.lock();
        {
            let mut shown = self.shown.lock();
            if *shown == latest {
                return;
            }
            *shown = latest;
        }
        self.listeners.fire(&TableEvent::RowsUpdated {
            first: 0,
            last: Category::ALL.len() - 1,
        });
    }
}

impl TableModel for SummaryModel {
    fn row_count(&self) -> usize {
        Category::ALL.len()
    }

    fn column_count(&self) -> usize {
        2
    }

    fn column_name(&self, column: usize) -> &'static str {
        match column {
            0 => "Category",
            1 => "Count",
            other => panic!("summary model has no column {other}"),
        }
    }

    fn value_at(&self, row: usize, column: usize) -> String {
        let Some(category) = Category::ALL.get(row).copied() else {
            panic!("summary model has no row {row}");
        };
        match column {
            0 => category.title().to_string(),
            1 => self.stats().count(category).to_string(),
            other => panic!("summary model has no column {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::outcome::TestRef;
    use crate::ui::event_loop::UiLoop;
    use crate::ui::table::EventLog;

    #[test]
    fn seeds_from_registration_and_coalesces_refreshes() {
        let ui = UiLoop::new();
        let summary = SummaryModel::new(ui.handle());
        let cache = Arc::new(NodeCache::new("lang"));
        cache.publish(TestRef::new("lang/A", ""), Category::Passed);

        summary.reset(Some(Arc::clone(&cache)));
        assert_eq!(summary.value_at(0, 1), "1");

        let log = EventLog::new();
        summary.add_listener(log.clone());
        for i in 0..10 {
            cache.publish(TestRef::new(format!("lang/F{i}"), ""), Category::Failed);
        }
        assert_eq!(ui.pending(), 1);
        ui.run_pending();
        assert_eq!(summary.value_at(1, 1), "10");
        assert_eq!(summary.value_at(1, 0), "Failed");
        assert_eq!(
            log.events(),
            vec![TableEvent::RowsUpdated { first: 0, last: 4 }]
        );
    }

    #[test]
    fn detach_off_ui_thread_drops_registration_and_pending_refresh() {
        let ui = UiLoop::new();
        let summary = SummaryModel::new(ui.handle());
        let cache = Arc::new(NodeCache::new("lang"));
        summary.reset(Some(Arc::clone(&cache)));
        cache.publish(TestRef::new("lang/A", ""), Category::Passed);
        assert_eq!(ui.pending(), 1);

        let other = Arc::clone(&summary);
        std::thread::spawn(move || other.detach())
            .join()
            .expect("detach thread");
        assert_eq!(cache.lock().observer_count(), 0);
        ui.run_pending();
        assert_eq!(summary.stats(), Stats::default());
    }

    #[test]
    fn old_cache_updates_are_ignored_after_reset() {
        let ui = UiLoop::new();
        let summary = SummaryModel::new(ui.handle());
        let old = Arc::new(NodeCache::new("old"));
        summary.reset(Some(Arc::clone(&old)));
        old.publish(TestRef::new("old/A", ""), Category::Error);
        summary.reset(None);
        ui.run_pending();

        assert_eq!(summary.stats(), Stats::default());
        assert_eq!(old.lock().observer_count(), 0);
    }
}

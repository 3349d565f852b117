//! In-memory NodeCache: the incrementally populated index of test outcomes
//! beneath one tree node, and the observer registration protocol consumers
//! attach through.
//!
//! Every mutation is applied and delivered to observers while the cache lock
//! is held. Registration captures its snapshot under the same lock, so an
//! observer sees each result exactly once: either in the snapshot it got back
//! from [`CacheGuard::add_observer`] or as a later callback.
//!
//! Callbacks run with the cache lock held. Observers may take inner locks
//! (model, buffer) but must never call back into the cache; in debug builds
//! [`crate::core::lock_order`] turns such a call into a panic instead of a
//! deadlock.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::lock_order::{LockLevel, OrderedGuard, OrderedMutex};
use crate::results::outcome::{Category, Stats, TestOutcomeEvent, TestRef};

/// Receives deltas from a [`NodeCache`] after registration.
pub trait CacheObserver: Send + Sync {
    fn test_added(&self, event: &TestOutcomeEvent);
    fn test_removed(&self, event: &TestOutcomeEvent);
    fn stats_updated(&self, stats: &Stats);
}

/// Handle returned by registration; needed to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// One bucket of test handles per category, captured atomically with
/// registration.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    buckets: [Vec<TestRef>; 5],
}

impl Snapshot {
    #[must_use]
    pub fn bucket(&self, category: Category) -> &[TestRef] {
        &self.buckets[category.index()]
    }

    /// Take ownership of one bucket, leaving it empty.
    pub fn take(&mut self, category: Category) -> Vec<TestRef> {
        std::mem::take(&mut self.buckets[category.index()])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }
}

/// Result of [`CacheGuard::add_observer`].
#[derive(Debug)]
pub struct Registration {
    pub id: ObserverId,
    /// Empty unless a snapshot was requested.
    pub snapshot: Snapshot,
    pub stats: Stats,
}

#[derive(Default)]
struct CacheState {
    buckets: [Vec<TestRef>; 5],
    placement: HashMap<TestRef, Category>,
    reasons: HashMap<TestRef, String>,
    stats: Stats,
    observers: Vec<(ObserverId, Arc<dyn CacheObserver>)>,
    next_observer: u64,
    complete: bool,
    aborted: bool,
}

impl CacheState {
    fn observers(&self) -> Vec<Arc<dyn CacheObserver>> {
        self.observers.iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    /// Detach `test` from whatever bucket holds it, returning the removal event.
    fn detach(&mut self, test: &TestRef) -> Option<TestOutcomeEvent> {
        let category = self.placement.remove(test)?;
        let bucket = &mut self.buckets[category.index()];
        if let Some(pos) = bucket.iter().position(|t| t == test) {
            bucket.remove(pos);
        }
        self.stats.bump(category, -1);
        let reason = self.reasons.remove(test);
        Some(TestOutcomeEvent {
            category,
            test: test.clone(),
            reason,
        })
    }

    fn attach(&mut self, event: &TestOutcomeEvent) {
        self.buckets[event.category.index()].push(event.test.clone());
        self.placement.insert(event.test.clone(), event.category);
        if let Some(reason) = &event.reason {
            self.reasons.insert(event.test.clone(), reason.clone());
        }
        self.stats.bump(event.category, 1);
    }
}

/// Incremental index of test outcomes under one tree node.
pub struct NodeCache {
    node: String,
    state: OrderedMutex<CacheState>,
}

impl std::fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCache").field("node", &self.node).finish()
    }
}

impl NodeCache {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            state: OrderedMutex::new(LockLevel::Cache, CacheState::default()),
        }
    }

    /// Tree path of the node this cache indexes.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Take the cache lock. Consumers that also need their own lock must take
    /// this one first.
    pub fn lock(&self) -> CacheGuard<'_> {
        CacheGuard {
            cache: self,
            state: self.state.lock(),
        }
    }

    // ──────────────────── producer side ────────────────────

    /// Record a result in a status category, moving it if it was already
    /// indexed elsewhere.
    pub fn publish(&self, test: TestRef, category: Category) {
        self.place(TestOutcomeEvent::new(category, test));
    }

    /// Record a test as rejected by the active filter.
    pub fn reject(&self, test: TestRef, reason: impl Into<String>) {
        self.place(TestOutcomeEvent::filtered(test, reason));
    }

    /// Move an indexed test to another status category. No-op for tests the
    /// cache has never seen.
    pub fn reclassify(&self, test: &TestRef, category: Category) -> bool {
        let mut state = self.state.lock();
        if !state.placement.contains_key(test) {
            return false;
        }
        let event = TestOutcomeEvent::new(category, test.clone());
        Self::apply_place(&mut state, event);
        true
    }

    /// Drop a test from the index entirely.
    pub fn withdraw(&self, test: &TestRef) -> bool {
        let mut state = self.state.lock();
        let Some(removed) = state.detach(test) else {
            return false;
        };
        let stats = state.stats;
        for observer in state.observers() {
            observer.test_removed(&removed);
            observer.stats_updated(&stats);
        }
        true
    }

    /// The scan reached the end of the subtree.
    pub fn mark_complete(&self) {
        self.state.lock().complete = true;
    }

    /// The scan was abandoned (e.g. work directory closed).
    pub fn abort(&self) {
        self.state.lock().aborted = true;
    }

    fn place(&self, event: TestOutcomeEvent) {
        let mut state = self.state.lock();
        Self::apply_place(&mut state, event);
    }

    fn apply_place(state: &mut CacheState, event: TestOutcomeEvent) {
        let removed = state.detach(&event.test);
        state.attach(&event);
        let stats = state.stats;
        for observer in state.observers() {
            if let Some(removed) = &removed {
                observer.test_removed(removed);
            }
            observer.test_added(&event);
            observer.stats_updated(&stats);
        }
    }

    // ──────────────────── short-lived reads ────────────────────

    #[must_use]
    pub fn stats(&self) -> Stats {
        self.lock().stats()
    }

    #[must_use]
    pub fn reject_reason(&self, test: &TestRef) -> Option<String> {
        self.lock().reject_reason(test)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lock().is_complete()
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.lock().is_aborted()
    }
}

/// Holder of the cache lock. All observer bookkeeping goes through here so
/// callers can extend the critical section over their own inner work.
pub struct CacheGuard<'a> {
    cache: &'a NodeCache,
    state: OrderedGuard<'a, CacheState>,
}

impl CacheGuard<'_> {
    /// The cache this guard locks.
    #[must_use]
    pub fn cache(&self) -> &NodeCache {
        self.cache
    }

    /// Register `observer`. With `want_snapshot`, the returned snapshot holds
    /// every result delivered so far; everything after arrives as callbacks.
    pub fn add_observer(
        &mut self,
        observer: Arc<dyn CacheObserver>,
        want_snapshot: bool,
    ) -> Registration {
        let id = ObserverId(self.state.next_observer);
        self.state.next_observer += 1;
        self.state.observers.push((id, observer));
        let snapshot = if want_snapshot {
            Snapshot {
                buckets: self.state.buckets.clone(),
            }
        } else {
            Snapshot::default()
        };
        Registration {
            id,
            snapshot,
            stats: self.state.stats,
        }
    }

    /// Deregister. Once this returns no further callbacks reach the observer.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.state.observers.len();
        self.state.observers.retain(|(oid, _)| *oid != id);
        self.state.observers.len() != before
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.state.observers.len()
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        self.state.stats
    }

    #[must_use]
    pub fn reject_count(&self) -> usize {
        self.state.stats.rejected
    }

    #[must_use]
    pub fn reject_reason(&self, test: &TestRef) -> Option<String> {
        self.state.reasons.get(test).cloned()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.complete
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.aborted
    }
}

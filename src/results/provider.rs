//! Non-blocking lookup of the NodeCache for a tree node.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::results::node_cache::NodeCache;

/// One-shot callback run when a node's cache becomes available.
pub type ReadyListener = Box<dyn FnOnce() + Send + 'static>;

/// Source of NodeCaches, one per tree node.
///
/// `try_cache` must not block waiting for a cache to become available. A
/// `None` means "not ready yet" and is not an error; callers retry later,
/// typically from a [`watch_ready`](Self::watch_ready) callback.
pub trait CacheProvider: Send + Sync {
    fn try_cache(&self, node: &str) -> Option<Arc<NodeCache>>;

    /// Run `listener` once, on any thread, as soon as `try_cache(node)` can
    /// succeed. Runs it immediately if that is already the case. Must not be
    /// called back while holding a cache lock.
    fn watch_ready(&self, node: &str, listener: ReadyListener);
}

struct Entry {
    cache: Arc<NodeCache>,
    ready: bool,
}

/// Provider backed by an in-memory map of node path to cache.
#[derive(Default)]
pub struct MemoryProvider {
    entries: RwLock<BTreeMap<String, Entry>>,
    watchers: Mutex<BTreeMap<String, Vec<ReadyListener>>>,
}

impl MemoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache that is immediately available.
    pub fn insert(&self, node: impl Into<String>) -> Arc<NodeCache> {
        self.insert_with(node.into(), true)
    }

    /// Register a cache that `try_cache` will not hand out until
    /// [`mark_ready`](Self::mark_ready) is called.
    pub fn insert_pending(&self, node: impl Into<String>) -> Arc<NodeCache> {
        self.insert_with(node.into(), false)
    }

    /// Make a pending cache available and wake anyone watching it.
    pub fn mark_ready(&self, node: &str) -> bool {
        let known = self.entries.write().get_mut(node).is_some_and(|entry| {
            entry.ready = true;
            true
        });
        if known {
            self.wake(node);
        }
        known
    }

    /// Registered node paths, sorted.
    #[must_use]
    pub fn nodes(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// The cache for `node` regardless of readiness (producer side).
    #[must_use]
    pub fn cache(&self, node: &str) -> Option<Arc<NodeCache>> {
        self.entries.read().get(node).map(|e| Arc::clone(&e.cache))
    }

    /// Watchers registered and not yet woken.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().values().map(Vec::len).sum()
    }

    fn insert_with(&self, node: String, ready: bool) -> Arc<NodeCache> {
        let cache = {
            let mut entries = self.entries.write();
            let entry = entries.entry(node.clone()).or_insert_with(|| Entry {
                cache: Arc::new(NodeCache::new(node.clone())),
                ready,
            });
            entry.ready |= ready;
            Arc::clone(&entry.cache)
        };
        if ready {
            self.wake(&node);
        }
        cache
    }

    /// Run the watchers of `node` outside every provider lock.
    fn wake(&self, node: &str) {
        let listeners = self.watchers.lock().remove(node).unwrap_or_default();
        if !listeners.is_empty() {
            tracing::debug!(node, watchers = listeners.len(), "cache ready");
        }
        for listener in listeners {
            listener();
        }
    }
}

impl CacheProvider for MemoryProvider {
    fn try_cache(&self, node: &str) -> Option<Arc<NodeCache>> {
        self.entries
            .read()
            .get(node)
            .filter(|e| e.ready)
            .map(|e| Arc::clone(&e.cache))
    }

    fn watch_ready(&self, node: &str, listener: ReadyListener) {
        {
            // Checked under the watcher lock: a concurrent `mark_ready` wakes
            // this watcher or has already set the flag read here.
            let mut watchers = self.watchers.lock();
            let ready = self.entries.read().get(node).is_some_and(|e| e.ready);
            if !ready {
                watchers.entry(node.to_string()).or_default().push(listener);
                return;
            }
        }
        listener();
    }
}

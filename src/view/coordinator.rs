//! Branch/tab coordinator: decides which node the views show and drives the
//! reset, bind and scan sequence whenever that node changes.
//!
//! ```text
//!          display(node)     try_cache = Some / cache ready
//!  Idle ─────────────────▶ Binding ─────────────────▶ Live
//!   ▲                        │  ▲                      │
//!   │        clear()         │  └──── display(node) ───┘
//!   └────────────────────────┴─────────────────────────┘
//! ```
//!
//! Lives on the UI thread; every mutating method asserts it. While binding,
//! the coordinator watches the provider and binds on the UI thread as soon
//! as the node's cache becomes available, so hosts need not poll
//! [`BranchCoordinator::retry`].

#![allow(missing_docs)]

use std::fmt;
use std::sync::{Arc, Weak};

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::lock_order::{LockLevel, OrderedMutex};
use crate::logger::journal::{JournalEvent, JournalHandle};
use crate::results::node_cache::NodeCache;
use crate::results::outcome::Category;
use crate::results::provider::CacheProvider;
use crate::sync::synchronizer::{BackgroundSynchronizer, ScanTarget, SyncOutcome};
use crate::ui::event_loop::UiHandle;
use crate::ui::table::TableModel;
use crate::view::category_model::CategoryViewModel;
use crate::view::summary::SummaryModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tab {
    Summary,
    Category(Category),
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Summary => f.write_str("Summary"),
            Self::Category(c) => f.write_str(c.title()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No node selected; only the summary tab is enabled.
    Idle,
    /// Node selected, cache not obtained yet.
    Binding,
    /// Cache bound and synchronizers started.
    Live,
}

/// Mutable coordinator state. Guarded at [`LockLevel::Coordinator`].
struct Binder {
    synchronizers: Vec<BackgroundSynchronizer>,
    /// Halted but possibly still running.
    retired: Vec<BackgroundSynchronizer>,
    node: Option<String>,
    cache: Option<Arc<NodeCache>>,
    state: CoordinatorState,
    selected: Tab,
    /// Bumped by every display, clear and shutdown. Readiness wake-ups carry
    /// the value they were registered under and are dropped on mismatch.
    display_id: u64,
    /// `display_id` a readiness watch is outstanding for.
    watching: Option<u64>,
}

struct Shared {
    ui: UiHandle,
    provider: Arc<dyn CacheProvider>,
    config: Config,
    models: Vec<Arc<CategoryViewModel>>,
    summary: Arc<SummaryModel>,
    journal: JournalHandle,
    binder: OrderedMutex<Binder>,
    me: Weak<Shared>,
}

/// Owner of the per-category models and the summary for one tree view.
///
/// Model and summary listeners may run while the coordinator holds its
/// state lock, so they must not call back into the coordinator.
pub struct BranchCoordinator {
    shared: Arc<Shared>,
}

impl BranchCoordinator {
    pub fn new(
        ui: UiHandle,
        provider: Arc<dyn CacheProvider>,
        config: Config,
        journal: JournalHandle,
    ) -> Self {
        ui.assert_ui_thread("BranchCoordinator::new");
        let models = Category::ALL
            .iter()
            .map(|c| {
                CategoryViewModel::new(*c, ui.clone(), config.buffer.batch_size, journal.clone())
            })
            .collect();
        let shared = Arc::new_cyclic(|me| Shared {
            summary: SummaryModel::new(ui.clone()),
            ui,
            provider,
            config,
            models,
            journal,
            binder: OrderedMutex::new(
                LockLevel::Coordinator,
                Binder {
                    synchronizers: Vec::new(),
                    retired: Vec::new(),
                    node: None,
                    cache: None,
                    state: CoordinatorState::Idle,
                    selected: Tab::Summary,
                    display_id: 0,
                    watching: None,
                },
            ),
            me: me.clone(),
        });
        Self { shared }
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.shared.binder.lock().state
    }

    #[must_use]
    pub fn node(&self) -> Option<String> {
        self.shared.binder.lock().node.clone()
    }

    #[must_use]
    pub fn model(&self, category: Category) -> &Arc<CategoryViewModel> {
        &self.shared.models[category.index()]
    }

    #[must_use]
    pub fn summary(&self) -> &Arc<SummaryModel> {
        &self.shared.summary
    }

    /// Synchronizers of the current node that are still running.
    #[must_use]
    pub fn active_scans(&self) -> usize {
        self.shared
            .binder
            .lock()
            .synchronizers
            .iter()
            .filter(|s| !s.is_finished())
            .count()
    }

    /// Show `node`. Halts running scans, empties every model and tries to
    /// bind the node's cache. A cache that is not ready yet leaves the
    /// coordinator in [`CoordinatorState::Binding`] until the provider
    /// reports it ready.
    pub fn display(&mut self, node: &str) -> Result<()> {
        let shared = &self.shared;
        shared.ui.assert_ui_thread("BranchCoordinator::display");
        let mut binder = shared.binder.lock();
        tracing::debug!(node, previous = ?binder.node, "display node");
        Shared::retire_synchronizers(&mut binder);
        shared.reset_models(None);
        binder.node = Some(node.to_string());
        binder.cache = None;
        binder.state = CoordinatorState::Binding;
        binder.display_id += 1;
        binder.watching = None;
        shared.journal.send(JournalEvent::NodeDisplayed {
            node: node.to_string(),
        });
        shared.try_bind(&mut binder).map(|_| ())
    }

    /// Re-attempt cache acquisition while in [`CoordinatorState::Binding`].
    /// Returns whether the coordinator went live.
    pub fn retry(&mut self) -> Result<bool> {
        let mut binder = self.shared.binder.lock();
        self.shared.try_bind(&mut binder)
    }

    /// Drop the current node and return to [`CoordinatorState::Idle`].
    pub fn clear(&mut self) {
        let shared = &self.shared;
        shared.ui.assert_ui_thread("BranchCoordinator::clear");
        let mut binder = shared.binder.lock();
        Shared::retire_synchronizers(&mut binder);
        shared.reset_models(None);
        binder.node = None;
        binder.cache = None;
        binder.state = CoordinatorState::Idle;
        binder.display_id += 1;
        binder.watching = None;
        shared.journal.send(JournalEvent::NodeCleared);
    }

    /// Select `tab` if it is enabled.
    pub fn select_tab(&mut self, tab: Tab) -> bool {
        self.shared.ui.assert_ui_thread("BranchCoordinator::select_tab");
        let mut binder = self.shared.binder.lock();
        if !self.shared.tab_enabled(&binder, tab) {
            return false;
        }
        binder.selected = tab;
        true
    }

    /// Selected tab, or the summary if the selection has since been disabled.
    #[must_use]
    pub fn selected_tab(&self) -> Tab {
        let binder = self.shared.binder.lock();
        self.shared.effective_tab(&binder)
    }

    #[must_use]
    pub fn is_tab_enabled(&self, tab: Tab) -> bool {
        let binder = self.shared.binder.lock();
        self.shared.tab_enabled(&binder, tab)
    }

    /// Status line for the selected tab. The summary line also says whether
    /// the node's run is still going or was aborted.
    #[must_use]
    pub fn status_message(&self) -> String {
        let binder = self.shared.binder.lock();
        let node = match (binder.state, &binder.node) {
            (CoordinatorState::Idle, _) | (_, None) => return "no node selected".to_string(),
            (CoordinatorState::Binding, Some(node)) => {
                return format!("waiting for results of {node}");
            }
            (CoordinatorState::Live, Some(node)) => node,
        };
        match self.shared.effective_tab(&binder) {
            Tab::Summary => {
                let stats = self.shared.summary.stats();
                let run = binder.cache.as_deref().map_or("", run_suffix);
                format!(
                    "{node}: {} tests accepted, {} filtered out{run}",
                    stats.accepted(),
                    stats.rejected
                )
            }
            Tab::Category(c) => {
                let model = self.model(c);
                match model.row_count() {
                    0 => format!("{node}: {}", model.empty_text()),
                    1 => format!("{node}: 1 test {}", c.title().to_lowercase()),
                    n => format!("{node}: {n} tests {}", c.title().to_lowercase()),
                }
            }
        }
    }

    /// Halt and join every synchronizer still held, finished or not, and
    /// detach all models. Returns one outcome per joined worker: the current
    /// node's scans plus retired scans that had not exited yet.
    pub fn shutdown(&mut self) -> Vec<SyncOutcome> {
        let shared = &self.shared;
        shared.ui.assert_ui_thread("BranchCoordinator::shutdown");
        let mut binder = shared.binder.lock();
        let mut workers = std::mem::take(&mut binder.synchronizers);
        workers.append(&mut binder.retired);
        for sync in &workers {
            sync.halt();
        }
        let outcomes = workers
            .iter_mut()
            .filter_map(BackgroundSynchronizer::join)
            .collect();
        shared.reset_models(None);
        binder.cache = None;
        binder.node = None;
        binder.state = CoordinatorState::Idle;
        binder.display_id += 1;
        binder.watching = None;
        outcomes
    }
}

impl Drop for BranchCoordinator {
    fn drop(&mut self) {
        {
            let binder = self.shared.binder.lock();
            for sync in binder.synchronizers.iter().chain(&binder.retired) {
                sync.halt();
            }
        }
        // Halted workers that have not registered yet skip on the halt flag;
        // those already registered are removed here.
        self.shared.detach_models();
    }
}

fn run_suffix(cache: &NodeCache) -> &'static str {
    let guard = cache.lock();
    if guard.is_aborted() {
        ", run aborted"
    } else if guard.is_complete() {
        ""
    } else {
        ", still running"
    }
}

// ──────────────────── internals ────────────────────

impl Shared {
    fn try_bind(&self, binder: &mut Binder) -> Result<bool> {
        self.ui.assert_ui_thread("BranchCoordinator::retry");
        binder.retired.retain(|s| !s.is_finished());
        if binder.state != CoordinatorState::Binding {
            return Ok(false);
        }
        let Some(node) = binder.node.clone() else {
            return Ok(false);
        };
        let Some(cache) = self.provider.try_cache(&node) else {
            tracing::debug!(node = %node, "cache not ready");
            self.watch_ready(binder, &node);
            self.journal.send(JournalEvent::CacheNotReady { node });
            return Ok(false);
        };

        self.reset_models(Some(&cache));
        binder.cache = Some(Arc::clone(&cache));
        binder.watching = None;
        for model in &self.models {
            let target: Arc<dyn ScanTarget> = model.clone();
            match BackgroundSynchronizer::start(
                target,
                Arc::clone(&cache),
                &self.config.synchronizer,
                self.journal.clone(),
            ) {
                Ok(sync) => binder.synchronizers.push(sync),
                Err(err) => {
                    self.journal.send(JournalEvent::Error {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                    Self::retire_synchronizers(binder);
                    self.reset_models(None);
                    binder.cache = None;
                    return Err(err);
                }
            }
        }
        binder.state = CoordinatorState::Live;
        tracing::debug!(node = %node, scans = binder.synchronizers.len(), "coordinator live");
        Ok(true)
    }

    /// Ask the provider to wake the UI thread once `node` is available. At
    /// most one watch is outstanding per display.
    fn watch_ready(&self, binder: &mut Binder, node: &str) {
        let display_id = binder.display_id;
        if binder.watching == Some(display_id) {
            return;
        }
        binder.watching = Some(display_id);
        let ui = self.ui.clone();
        let me = self.me.clone();
        self.provider.watch_ready(
            node,
            Box::new(move || {
                ui.post(move || {
                    if let Some(shared) = me.upgrade() {
                        shared.on_ready(display_id);
                    }
                });
            }),
        );
    }

    fn on_ready(&self, display_id: u64) {
        let mut binder = self.binder.lock();
        if binder.display_id != display_id {
            return;
        }
        binder.watching = None;
        if let Err(err) = self.try_bind(&mut binder) {
            tracing::warn!(code = err.code(), error = %err, "binding ready cache failed");
        }
    }

    fn tab_enabled(&self, binder: &Binder, tab: Tab) -> bool {
        match tab {
            Tab::Summary => true,
            Tab::Category(c) => {
                binder.state != CoordinatorState::Idle && self.models[c.index()].is_enabled()
            }
        }
    }

    fn effective_tab(&self, binder: &Binder) -> Tab {
        if self.tab_enabled(binder, binder.selected) {
            binder.selected
        } else {
            Tab::Summary
        }
    }

    fn retire_synchronizers(binder: &mut Binder) {
        for sync in binder.synchronizers.drain(..) {
            sync.halt();
            binder.retired.push(sync);
        }
        binder.retired.retain(|s| !s.is_finished());
    }

    fn reset_models(&self, cache: Option<&Arc<NodeCache>>) {
        for model in &self.models {
            model.reset(cache.cloned());
        }
        self.summary.reset(cache.cloned());
    }

    fn detach_models(&self) {
        for model in &self.models {
            model.detach();
        }
        self.summary.detach();
    }
}

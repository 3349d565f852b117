//! Headless simulation of an exec tool session.
//!
//! A producer thread plays the harness: it publishes random outcomes into the
//! in-memory caches of a handful of tree nodes, rejects some tests with a
//! filter reason and reclassifies others as they finish. The calling thread
//! plays the UI: it owns the [`UiLoop`], drives a [`BranchCoordinator`], and
//! switches nodes part way through the feed. At the end every category table
//! is checked against the cache it shows.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{Result, SyncError};
use crate::logger::journal::JournalHandle;
use crate::results::node_cache::NodeCache;
use crate::results::outcome::{Category, TestRef};
use crate::results::provider::{CacheProvider, MemoryProvider};
use crate::ui::event_loop::UiLoop;
use crate::ui::table::TableModel;
use crate::view::coordinator::{BranchCoordinator, CoordinatorState, Tab};

const FILTER_REASONS: [&str; 3] = [
    "keyword 'slow' excluded",
    "status filter: previously passed",
    "prior status unknown",
];

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Tree nodes to populate.
    pub nodes: usize,
    pub tests_per_node: usize,
    /// Fraction of tests rejected by the filter.
    pub filtered_ratio: f64,
    /// Switch from the first node to the second after this many outcomes.
    pub switch_after: usize,
    /// The first node's cache stays "not ready" this long.
    pub pending_for: Duration,
    /// Pause between outcomes; zero publishes as fast as possible.
    pub publish_delay: Duration,
    /// Give up waiting for the views to settle after this long.
    pub timeout: Duration,
    pub seed: Option<u64>,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            nodes: 3,
            tests_per_node: 500,
            filtered_ratio: 0.1,
            switch_after: 200,
            pending_for: Duration::from_millis(50),
            publish_delay: Duration::ZERO,
            timeout: Duration::from_secs(30),
            seed: None,
        }
    }
}

impl SimulateOptions {
    pub fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            return Err(SyncError::InvalidConfig {
                details: "simulate: at least one node required".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.filtered_ratio) {
            return Err(SyncError::InvalidConfig {
                details: format!(
                    "simulate: filtered ratio must be within [0, 1], got {}",
                    self.filtered_ratio
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TabReport {
    pub tab: String,
    pub enabled: bool,
    pub rows: usize,
    /// Count the cache reports for the category.
    pub expected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub nodes: Vec<String>,
    pub displayed: Option<String>,
    pub switched: bool,
    pub published: usize,
    pub tabs: Vec<TabReport>,
    pub status: String,
    pub ui_tasks_run: u64,
    pub elapsed_ms: u64,
    /// Every table matches its cache.
    pub consistent: bool,
}

/// Run one simulated session on the calling thread.
pub fn run_simulation(
    options: &SimulateOptions,
    config: &Config,
    journal: JournalHandle,
) -> Result<SimulationReport> {
    options.validate()?;
    let seed = options.seed.unwrap_or_else(rand::random);
    let started = Instant::now();

    let ui = UiLoop::new();
    let provider = Arc::new(MemoryProvider::new());
    let nodes: Vec<String> = (0..options.nodes).map(|i| format!("suite/node{i}")).collect();
    let caches: Vec<Arc<NodeCache>> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            if i == 0 {
                provider.insert_pending(node.clone())
            } else {
                provider.insert(node.clone())
            }
        })
        .collect();

    let mut coordinator = BranchCoordinator::new(
        ui.handle(),
        provider.clone() as Arc<dyn CacheProvider>,
        config.clone(),
        journal,
    );
    coordinator.display(&nodes[0])?;
    tracing::info!(seed, nodes = nodes.len(), "simulation started");

    let published = Arc::new(AtomicUsize::new(0));
    let producer_done = Arc::new(AtomicBool::new(false));
    let producer = {
        let caches = caches.clone();
        let published = Arc::clone(&published);
        let done = Arc::clone(&producer_done);
        let options = options.clone();
        thread::Builder::new()
            .name("evs-producer".to_string())
            .spawn(move || {
                produce(&caches, &options, seed, &published);
                done.store(true, Ordering::Release);
            })
            .map_err(|e| SyncError::spawn("evs-producer", &e))?
    };

    let mut ready_marked = false;
    let mut switched = false;
    let deadline = started + options.timeout;
    loop {
        ui.run_for(Duration::from_millis(5));

        if !ready_marked && started.elapsed() >= options.pending_for {
            provider.mark_ready(&nodes[0]);
            ready_marked = true;
        }
        if !switched && nodes.len() > 1 && published.load(Ordering::Acquire) >= options.switch_after
        {
            tracing::info!(from = %nodes[0], to = %nodes[1], "switching node mid-scan");
            coordinator.display(&nodes[1])?;
            switched = true;
        }

        let settled = producer_done.load(Ordering::Acquire)
            && coordinator.state() == CoordinatorState::Live
            && coordinator.active_scans() == 0
            && ui.pending() == 0
            && Category::ALL.iter().all(|c| {
                coordinator.model(*c).buffer().pending_len() == (0, 0)
            });
        if settled {
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!("simulation timed out before views settled");
            break;
        }
    }
    if producer.join().is_err() {
        return Err(SyncError::Runtime {
            details: "producer thread panicked".to_string(),
        });
    }
    ui.run_pending();

    let displayed = coordinator.node();
    let cache = displayed
        .as_deref()
        .and_then(|node| provider.cache(node));
    let stats = cache.map(|c| c.stats()).unwrap_or_default();
    let tabs: Vec<TabReport> = Category::ALL
        .iter()
        .map(|c| TabReport {
            tab: c.title().to_string(),
            enabled: coordinator.is_tab_enabled(Tab::Category(*c)),
            rows: coordinator.model(*c).row_count(),
            expected: stats.count(*c),
        })
        .collect();
    let consistent = tabs
        .iter()
        .all(|t| t.rows == t.expected && t.enabled == (t.expected > 0));
    let status = coordinator.status_message();
    coordinator.shutdown();

    let report = SimulationReport {
        seed,
        nodes,
        displayed,
        switched,
        published: published.load(Ordering::Acquire),
        tabs,
        status,
        ui_tasks_run: ui.handle().total_posted(),
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        consistent,
    };
    tracing::info!(
        consistent = report.consistent,
        published = report.published,
        elapsed_ms = report.elapsed_ms,
        "simulation finished"
    );
    Ok(report)
}

/// Producer body. Interleaves nodes so the switch happens while every node is
/// still filling.
fn produce(caches: &[Arc<NodeCache>], options: &SimulateOptions, seed: u64, published: &AtomicUsize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut not_run: Vec<Vec<TestRef>> = vec![Vec::new(); caches.len()];

    for i in 0..options.tests_per_node {
        for (n, cache) in caches.iter().enumerate() {
            let name = format!("{}/T{i:05}", cache.node());
            if rng.random_bool(options.filtered_ratio) {
                let reason = FILTER_REASONS[rng.random_range(0..FILTER_REASONS.len())];
                cache.reject(TestRef::new(name, ""), reason);
            } else {
                let category = match rng.random_range(0..10) {
                    0..=5 => Category::Passed,
                    6 => Category::Failed,
                    7 => Category::Error,
                    _ => Category::NotRun,
                };
                let test = TestRef::new(name, category.title());
                cache.publish(test.clone(), category);
                if category == Category::NotRun {
                    not_run[n].push(test);
                }
            }
            published.fetch_add(1, Ordering::Release);

            // Some queued tests finish later and move out of Not Run.
            if !not_run[n].is_empty() && rng.random_bool(0.2) {
                let idx = rng.random_range(0..not_run[n].len());
                let test = not_run[n].swap_remove(idx);
                let to = if rng.random_bool(0.8) {
                    Category::Passed
                } else {
                    Category::Failed
                };
                cache.reclassify(&test, to);
            }
            if !options.publish_delay.is_zero() {
                thread::sleep(options.publish_delay);
            }
        }
    }
    for cache in caches {
        cache.mark_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_options() {
        let options = SimulateOptions {
            nodes: 0,
            ..SimulateOptions::default()
        };
        assert!(options.validate().is_err());
        let options = SimulateOptions {
            filtered_ratio: 1.5,
            ..SimulateOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn small_session_settles_consistently() {
        let options = SimulateOptions {
            nodes: 2,
            tests_per_node: 120,
            switch_after: 60,
            pending_for: Duration::from_millis(10),
            seed: Some(7),
            ..SimulateOptions::default()
        };
        let report =
            run_simulation(&options, &Config::default(), JournalHandle::disabled()).unwrap();
        assert!(report.switched);
        assert_eq!(report.displayed.as_deref(), Some("suite/node1"));
        assert_eq!(report.published, 240);
        assert!(report.consistent, "{report:?}");
    }
}

//! Background snapshot feed for one view model.
//!
//! A synchronizer is a short-lived worker thread. It takes the cache lock,
//! registers the model as an observer with a snapshot request, enqueues the
//! model's bucket of that snapshot into the commit buffer, and exits. Because
//! registration and capture happen under one critical section, every later
//! cache mutation arrives at the model as an observer callback and nothing is
//! seen twice.
//!
//! Cancellation is cooperative: the halt flag is polled before and after the
//! cache lock is taken and once per fed entry.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::core::config::SynchronizerConfig;
use crate::core::errors::{Result, SyncError};
use crate::logger::journal::{JournalEvent, JournalHandle};
use crate::results::node_cache::{CacheGuard, NodeCache};
use crate::results::outcome::{Category, TestRef};
use crate::sync::buffer::CommitBuffer;

/// What a model hands back when it registers inside the cache critical
/// section.
pub struct Attachment {
    /// This model's bucket of the registration snapshot.
    pub bucket: Vec<TestRef>,
    /// Buffer epoch the bucket belongs to.
    pub epoch: u64,
    pub buffer: Arc<CommitBuffer>,
}

/// A model a synchronizer can feed.
pub trait ScanTarget: Send + Sync {
    fn category(&self) -> Category;

    /// Register with the locked cache and return the snapshot bucket, or
    /// `None` if the model is no longer bound to this cache.
    fn attach(&self, guard: &mut CacheGuard<'_>) -> Option<Attachment>;
}

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The whole bucket was enqueued.
    Completed { fed: usize },
    /// Stopped early by [`BackgroundSynchronizer::halt`].
    Halted { fed: usize },
    /// Halted before registering, or the model had been rebound.
    Skipped,
}

/// Handle to one running snapshot feed.
pub struct BackgroundSynchronizer {
    category: Category,
    node: String,
    halt: Arc<AtomicBool>,
    join: Option<JoinHandle<SyncOutcome>>,
}

impl std::fmt::Debug for BackgroundSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundSynchronizer")
            .field("category", &self.category)
            .field("node", &self.node)
            .field("halted", &self.is_halted())
            .finish()
    }
}

impl BackgroundSynchronizer {
    /// Spawn a feed of `target` from `cache`.
    pub fn start(
        target: Arc<dyn ScanTarget>,
        cache: Arc<NodeCache>,
        config: &SynchronizerConfig,
        journal: JournalHandle,
    ) -> Result<Self> {
        let category = target.category();
        let node = cache.node().to_string();
        let halt = Arc::new(AtomicBool::new(false));
        let name = format!("{}-{}", config.thread_name_prefix, category.label());
        let worker = Worker {
            target,
            cache,
            halt: Arc::clone(&halt),
            yield_every: config.yield_every,
            journal,
        };
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(|e| SyncError::spawn(&name, &e))?;
        tracing::debug!(%category, node = %node, thread = %name, "synchronizer started");
        Ok(Self {
            category,
            node,
            halt,
            join: Some(join),
        })
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Ask the worker to stop at its next poll. Does not wait.
    pub fn halt(&self) {
        self.halt.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halt.load(Ordering::Acquire)
    }

    /// Whether the worker thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the worker. `None` if it was already joined or panicked.
    pub fn join(&mut self) -> Option<SyncOutcome> {
        let join = self.join.take()?;
        match join.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                tracing::warn!(category = %self.category, node = %self.node, "synchronizer panicked");
                None
            }
        }
    }
}

impl Drop for BackgroundSynchronizer {
    fn drop(&mut self) {
        self.halt();
    }
}

struct Worker {
    target: Arc<dyn ScanTarget>,
    cache: Arc<NodeCache>,
    halt: Arc<AtomicBool>,
    yield_every: usize,
    journal: JournalHandle,
}

impl Worker {
    fn halted(&self) -> bool {
        self.halt.load(Ordering::Acquire)
    }

    fn run(self) -> SyncOutcome {
        let category = self.target.category();
        let node = self.cache.node().to_string();
        if self.halted() {
            return SyncOutcome::Skipped;
        }
        let started = Instant::now();

        let mut guard = self.cache.lock();
        if self.halted() {
            return SyncOutcome::Skipped;
        }
        let Some(attachment) = self.target.attach(&mut guard) else {
            tracing::debug!(%category, node = %node, "model rebound before scan, skipping");
            return SyncOutcome::Skipped;
        };
        self.journal.send(JournalEvent::ScanStarted {
            category,
            node: node.clone(),
        });

        let Attachment {
            bucket,
            epoch,
            buffer,
        } = attachment;
        let len = bucket.len();
        let mut fed = 0;
        let mut halted = false;
        for (i, test) in bucket.into_iter().enumerate() {
            if self.halted() {
                halted = true;
                break;
            }
            if !buffer.enqueue_add_in(epoch, test, i + 1 < len) {
                // Buffer was reset under us; the model belongs to a new scan.
                halted = true;
                break;
            }
            fed += 1;
            if self.yield_every > 0 && fed % self.yield_every == 0 {
                thread::yield_now();
            }
        }
        drop(guard);

        if halted {
            // Entries already queued with notification suppressed still need
            // a go-live unless the buffer has been reset.
            if buffer.epoch() == epoch {
                buffer.flush();
            }
            tracing::debug!(%category, node = %node, fed, "synchronizer halted");
            self.journal.send(JournalEvent::ScanHalted {
                category,
                node,
                fed,
            });
            return SyncOutcome::Halted { fed };
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(%category, node = %node, fed, duration_ms, "synchronizer finished");
        self.journal.send(JournalEvent::ScanFinished {
            category,
            node,
            fed,
            duration_ms,
        });
        SyncOutcome::Completed { fed }
    }
}

//! Sync journal: a dedicated logger thread owns the [`JsonlWriter`]; every
//! other thread sends [`JournalEvent`]s through a bounded crossbeam channel
//! with `try_send`, so neither the UI thread nor a scan worker ever waits on
//! journal I/O.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::JournalConfig;
use crate::core::errors::{Result, SyncError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
use crate::results::outcome::Category;

// ──────────────────── public event type ────────────────────

/// Events recorded in the sync journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEvent {
    SessionStarted {
        version: String,
        config_hash: String,
    },
    SessionStopped {
        dropped_events: u64,
    },
    NodeDisplayed {
        node: String,
    },
    NodeCleared,
    CacheNotReady {
        node: String,
    },
    ModelReset {
        category: Category,
        node: Option<String>,
        cancelled: usize,
    },
    ScanStarted {
        category: Category,
        node: String,
    },
    ScanFinished {
        category: Category,
        node: String,
        fed: usize,
        duration_ms: u64,
    },
    ScanHalted {
        category: Category,
        node: String,
        fed: usize,
    },
    BatchApplied {
        category: Category,
        removed: usize,
        inserted: usize,
        remaining: usize,
    },
    TabToggled {
        category: Category,
        enabled: bool,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to exit.
    Shutdown,
}

impl JournalEvent {
    fn into_entry(self) -> Option<LogEntry> {
        let entry = match self {
            Self::SessionStarted {
                version,
                config_hash,
            } => {
                let mut e = LogEntry::new(EventType::SessionStart, Severity::Info);
                e.details = Some(format!("version={version} config={config_hash}"));
                e
            }
            Self::SessionStopped { dropped_events } => {
                let mut e = LogEntry::new(EventType::SessionStop, Severity::Info);
                e.count = Some(dropped_events);
                e
            }
            Self::NodeDisplayed { node } => {
                let mut e = LogEntry::new(EventType::NodeDisplayed, Severity::Info);
                e.node = Some(node);
                e
            }
            Self::NodeCleared => LogEntry::new(EventType::NodeCleared, Severity::Info),
            Self::CacheNotReady { node } => {
                let mut e = LogEntry::new(EventType::CacheNotReady, Severity::Debug);
                e.node = Some(node);
                e
            }
            Self::ModelReset {
                category,
                node,
                cancelled,
            } => {
                let mut e = LogEntry::new(EventType::ModelReset, Severity::Debug);
                e.category = Some(category);
                e.node = node;
                e.count = Some(cancelled as u64);
                e
            }
            Self::ScanStarted { category, node } => {
                let mut e = LogEntry::new(EventType::ScanStarted, Severity::Debug);
                e.category = Some(category);
                e.node = Some(node);
                e
            }
            Self::ScanFinished {
                category,
                node,
                fed,
                duration_ms,
            } => {
                let mut e = LogEntry::new(EventType::ScanFinished, Severity::Info);
                e.category = Some(category);
                e.node = Some(node);
                e.count = Some(fed as u64);
                e.duration_ms = Some(duration_ms);
                e
            }
            Self::ScanHalted {
                category,
                node,
                fed,
            } => {
                let mut e = LogEntry::new(EventType::ScanHalted, Severity::Info);
                e.category = Some(category);
                e.node = Some(node);
                e.count = Some(fed as u64);
                e
            }
            Self::BatchApplied {
                category,
                removed,
                inserted,
                remaining,
            } => {
                let mut e = LogEntry::new(EventType::BatchApplied, Severity::Debug);
                e.category = Some(category);
                e.count = Some(inserted as u64);
                e.details = Some(format!("removed={removed} remaining={remaining}"));
                e
            }
            Self::TabToggled { category, enabled } => {
                let mut e = LogEntry::new(EventType::TabToggled, Severity::Info);
                e.category = Some(category);
                e.enabled = Some(enabled);
                e
            }
            Self::Error { code, message } => {
                let mut e = LogEntry::new(EventType::Error, Severity::Warning);
                e.error_code = Some(code);
                e.details = Some(message);
                e
            }
            Self::Shutdown => return None,
        };
        Some(entry)
    }
}

// ──────────────────── public handle ────────────────────

/// Thread-safe, cheaply-cloneable handle for journaling.
///
/// A handle built with [`JournalHandle::disabled`] accepts and discards
/// everything.
#[derive(Clone, Debug)]
pub struct JournalHandle {
    tx: Option<Sender<JournalEvent>>,
    dropped_events: Arc<AtomicU64>,
}

impl Default for JournalHandle {
    fn default() -> Self {
        Self::disabled()
    }
}

impl JournalHandle {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A handle whose events land in the returned receiver instead of a file.
    #[must_use]
    pub fn capture(capacity: usize) -> (Self, Receiver<JournalEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx: Some(tx),
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Non-blocking send. A full channel drops the event and counts it.
    pub fn send(&self, event: JournalEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(TrySendError::Full(_)) = tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(JournalEvent::Shutdown);
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the journal thread and return a handle to it. With the journal
/// disabled in `config`, returns a discarding handle and no thread.
pub fn spawn_journal(
    config: &JournalConfig,
) -> Result<(JournalHandle, Option<thread::JoinHandle<()>>)> {
    if !config.enabled {
        return Ok((JournalHandle::disabled(), None));
    }
    let (handle, rx) = JournalHandle::capture(config.channel_capacity);
    let jsonl = JsonlConfig::from(config);
    let join = thread::Builder::new()
        .name("evs-journal".to_string())
        .spawn(move || journal_thread_main(&rx, jsonl))
        .map_err(|e| SyncError::spawn("evs-journal", &e))?;
    Ok((handle, Some(join)))
}

fn journal_thread_main(rx: &Receiver<JournalEvent>, config: JsonlConfig) {
    let mut writer = JsonlWriter::open(config);
    while let Ok(event) = rx.recv() {
        match event.into_entry() {
            Some(entry) => writer.write_entry(&entry),
            None => break,
        }
        if rx.is_empty() {
            writer.flush();
        }
    }
    writer.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_handle_discards() {
        let handle = JournalHandle::disabled();
        handle.send(JournalEvent::NodeCleared);
        assert!(!handle.is_enabled());
        assert_eq!(handle.dropped_events(), 0);
    }

    #[test]
    fn full_channel_counts_drops() {
        let (handle, rx) = JournalHandle::capture(1);
        handle.send(JournalEvent::NodeCleared);
        handle.send(JournalEvent::NodeCleared);
        assert_eq!(handle.dropped_events(), 1);
        assert_eq!(rx.try_recv().ok(), Some(JournalEvent::NodeCleared));
    }

    #[test]
    fn journal_thread_writes_lines_and_exits_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = JournalConfig {
            enabled: true,
            path: dir.path().join("sync.jsonl"),
            fallback_path: None,
            channel_capacity: 16,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 2,
        };
        let (handle, join) = spawn_journal(&config).unwrap();
        handle.send(JournalEvent::NodeDisplayed {
            node: "lang/expr".to_string(),
        });
        handle.send(JournalEvent::TabToggled {
            category: Category::Failed,
            enabled: true,
        });
        handle.shutdown();
        join.expect("thread").join().unwrap();

        let contents = std::fs::read_to_string(&config.path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "node_displayed");
        assert_eq!(lines[0]["node"], "lang/expr");
        assert_eq!(lines[1]["category"], "failed");
    }

    #[test]
    fn disabled_config_spawns_nothing() {
        let config = JournalConfig {
            enabled: false,
            ..JournalConfig::default()
        };
        let (handle, join) = spawn_journal(&config).unwrap();
        assert!(!handle.is_enabled());
        assert!(join.is_none());
    }
}

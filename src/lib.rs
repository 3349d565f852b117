#![forbid(unsafe_code)]

//! Exec view sync — incremental tree-to-view synchronization for a test
//! harness exec tool.
//!
//! Test outcomes under a tree node accumulate in a [`NodeCache`] while the
//! harness runs. Each result category has a table model owned by the UI
//! thread. A short-lived background synchronizer registers the model with the
//! cache and feeds it the snapshot; later deltas arrive as observer callbacks.
//! Both paths go through a two-stage commit buffer so widgets only ever see
//! rows promoted by a go-live task on the UI thread.
//!
//! 1. **Observer registration** — snapshot and delta delivery under one lock
//! 2. **Commit buffer** — pending queue, batched go-live, cancellable tasks
//! 3. **Coordinator** — node switches halt scans and reset every model
//!
//! # Library usage
//!
//! ```rust,no_run
//! use exec_view_sync::prelude::*;
//! ```
//!
//! [`NodeCache`]: results::node_cache::NodeCache

pub mod prelude;

#[cfg(feature = "cli")]
pub mod cli;
pub mod core;
pub mod logger;
pub mod results;
pub mod sync;
pub mod ui;
pub mod view;

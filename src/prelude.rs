//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use exec_view_sync::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, SyncError};

// Results
pub use crate::results::node_cache::{CacheObserver, NodeCache, Snapshot};
pub use crate::results::outcome::{Category, Stats, TestOutcomeEvent, TestRef};
pub use crate::results::provider::{CacheProvider, MemoryProvider};

// UI
pub use crate::ui::event_loop::{UiHandle, UiLoop};
pub use crate::ui::table::{TableEvent, TableListener, TableModel};

// Sync
pub use crate::sync::buffer::CommitBuffer;
pub use crate::sync::synchronizer::{BackgroundSynchronizer, SyncOutcome};

// View
pub use crate::view::category_model::CategoryViewModel;
pub use crate::view::coordinator::{BranchCoordinator, CoordinatorState, Tab};
pub use crate::view::summary::SummaryModel;

// Logger
pub use crate::logger::journal::{JournalEvent, JournalHandle, spawn_journal};

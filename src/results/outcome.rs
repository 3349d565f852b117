//! Outcome categories, test handles and the events a NodeCache emits.

#![allow(missing_docs)]

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ──────────────────── category ────────────────────

/// Bucket a test result falls into for display purposes.
///
/// The first four are status categories; `Filtered` holds tests the active
/// filter rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Passed,
    Failed,
    Error,
    NotRun,
    Filtered,
}

impl Category {
    /// Every category, in tab order.
    pub const ALL: [Self; 5] = [
        Self::Passed,
        Self::Failed,
        Self::Error,
        Self::NotRun,
        Self::Filtered,
    ];

    /// The four status categories counted in [`Stats::counts`].
    pub const STATUS: [Self; 4] = [Self::Passed, Self::Failed, Self::Error, Self::NotRun];

    /// Dense index into per-category arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Passed => 0,
            Self::Failed => 1,
            Self::Error => 2,
            Self::NotRun => 3,
            Self::Filtered => 4,
        }
    }

    /// Stable machine label (journal, thread names).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::NotRun => "not_run",
            Self::Filtered => "filtered_out",
        }
    }

    /// Human title used for tab captions and status lines.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Passed => "Passed",
            Self::Failed => "Failed",
            Self::Error => "Error",
            Self::NotRun => "Not Run",
            Self::Filtered => "Filtered Out",
        }
    }

    #[must_use]
    pub const fn is_status(self) -> bool {
        !matches!(self, Self::Filtered)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ──────────────────── test handle ────────────────────

#[derive(Debug)]
struct TestRecord {
    name: String,
    status_message: String,
}

/// Opaque handle to one test result.
///
/// Equality and hashing are by identity: two handles are equal only when they
/// point at the same result, even if a second result carries the same name.
#[derive(Clone)]
pub struct TestRef(Arc<TestRecord>);

impl TestRef {
    pub fn new(name: impl Into<String>, status_message: impl Into<String>) -> Self {
        Self(Arc::new(TestRecord {
            name: name.into(),
            status_message: status_message.into(),
        }))
    }

    /// Test path relative to the suite root, e.g. `lang/expr/Add01.html`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn status_message(&self) -> &str {
        &self.0.status_message
    }

    /// Whether both handles refer to the same result.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for TestRef {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for TestRef {}

impl Hash for TestRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Debug for TestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TestRef").field(&self.0.name).finish()
    }
}

// ──────────────────── events & stats ────────────────────

/// One change delivered by a NodeCache to its observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcomeEvent {
    pub category: Category,
    pub test: TestRef,
    /// Why the test was filtered out; only set for [`Category::Filtered`].
    pub reason: Option<String>,
}

impl TestOutcomeEvent {
    #[must_use]
    pub fn new(category: Category, test: TestRef) -> Self {
        Self {
            category,
            test,
            reason: None,
        }
    }

    #[must_use]
    pub fn filtered(test: TestRef, reason: impl Into<String>) -> Self {
        Self {
            category: Category::Filtered,
            test,
            reason: Some(reason.into()),
        }
    }
}

/// Accepted counts per status category plus the filtered-out count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Indexed by [`Category::index`] for the four status categories.
    pub counts: [usize; 4],
    pub rejected: usize,
}

impl Stats {
    #[must_use]
    pub const fn from_counts(counts: [usize; 4], rejected: usize) -> Self {
        Self { counts, rejected }
    }

    #[must_use]
    pub const fn count(&self, category: Category) -> usize {
        match category {
            Category::Filtered => self.rejected,
            other => self.counts[other.index()],
        }
    }

    /// Tests accepted by the filter, across all status categories.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.counts.iter().sum()
    }

    pub(crate) fn bump(&mut self, category: Category, delta: isize) {
        let slot = match category {
            Category::Filtered => &mut self.rejected,
            other => &mut self.counts[other.index()],
        };
        *slot = slot.saturating_add_signed(delta);
    }
}

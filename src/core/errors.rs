//! EVS-prefixed error types with structured error codes.
//!
//! Only recoverable runtime conditions live here. Races inside the sync
//! protocol (stale callbacks, removals of rows that are already gone, a cache
//! that is not ready yet) are handled locally and never become errors; broken
//! invariants panic.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Top-level error type for the exec view synchronizer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("[EVS-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[EVS-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[EVS-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[EVS-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[EVS-3001] failed to spawn thread {name}: {details}")]
    ThreadSpawn { name: String, details: String },

    #[error("[EVS-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[EVS-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SyncError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "EVS-1001",
            Self::MissingConfig { .. } => "EVS-1002",
            Self::ConfigParse { .. } => "EVS-1003",
            Self::Serialization { .. } => "EVS-2101",
            Self::ThreadSpawn { .. } => "EVS-3001",
            Self::Io { .. } => "EVS-3002",
            Self::Runtime { .. } => "EVS-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::ThreadSpawn { .. } | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for thread spawn failures.
    #[must_use]
    pub fn spawn(name: impl Into<String>, source: &std::io::Error) -> Self {
        Self::ThreadSpawn {
            name: name.into(),
            details: source.to_string(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

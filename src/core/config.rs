//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SyncError};

/// Largest accepted go-live batch. Anything bigger defeats the per-turn
/// latency cap the batch exists for.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub buffer: BufferConfig,
    pub synchronizer: SynchronizerConfig,
    pub journal: JournalConfig,
    pub debug: DebugConfig,
    pub paths: PathsConfig,
}

/// Two-stage commit buffer tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum additions promoted to the live store per go-live pass.
    pub batch_size: usize,
}

/// Background synchronizer tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SynchronizerConfig {
    /// Yield the CPU after this many snapshot entries (0 disables yielding).
    pub yield_every: usize,
    /// Prefix for worker thread names; the category label is appended.
    pub thread_name_prefix: String,
}

/// Sync journal (JSONL) settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    pub channel_capacity: usize,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

/// Debug-only checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DebugConfig {
    /// Enforce cache-lock-before-model-lock ordering at runtime
    /// (only effective in debug builds).
    pub lock_order_checks: bool,
}

/// Filesystem paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            yield_every: 64,
            thread_name_prefix: "evs-sync".to_string(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: data_dir().join("sync.jsonl"),
            fallback_path: Some(env::temp_dir().join("evsync-sync.jsonl")),
            channel_capacity: 1024,
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            lock_order_checks: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: config_dir().join("config.toml"),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(env::temp_dir, PathBuf::from)
}

fn config_dir() -> PathBuf {
    env::var_os("XDG_CONFIG_HOME")
        .map_or_else(|| home_dir().join(".config"), PathBuf::from)
        .join("evsync")
}

fn data_dir() -> PathBuf {
    env::var_os("XDG_DATA_HOME")
        .map_or_else(|| home_dir().join(".local/share"), PathBuf::from)
        .join("evsync")
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| SyncError::Io {
                path: path_buf.clone(),
                source,
            })?;
            Self::from_toml_str(&raw)?
        } else if is_explicit_path {
            return Err(SyncError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Deterministic hash of the effective config for the sync journal.
    ///
    /// FNV-1a over the canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("EVS_BUFFER_BATCH_SIZE") {
            self.buffer.batch_size = parse_env("EVS_BUFFER_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("EVS_SYNC_YIELD_EVERY") {
            self.synchronizer.yield_every = parse_env("EVS_SYNC_YIELD_EVERY", &raw)?;
        }
        if let Some(raw) = lookup("EVS_SYNC_THREAD_PREFIX") {
            self.synchronizer.thread_name_prefix = raw;
        }
        if let Some(raw) = lookup("EVS_JOURNAL_ENABLED") {
            self.journal.enabled = parse_env("EVS_JOURNAL_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("EVS_JOURNAL_PATH") {
            self.journal.path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("EVS_JOURNAL_CHANNEL_CAPACITY") {
            self.journal.channel_capacity = parse_env("EVS_JOURNAL_CHANNEL_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("EVS_DEBUG_LOCK_ORDER_CHECKS") {
            self.debug.lock_order_checks = parse_env("EVS_DEBUG_LOCK_ORDER_CHECKS", &raw)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.buffer.batch_size == 0 {
            return Err(SyncError::InvalidConfig {
                details: "buffer.batch_size must be > 0".to_string(),
            });
        }
        if self.buffer.batch_size > MAX_BATCH_SIZE {
            return Err(SyncError::InvalidConfig {
                details: format!(
                    "buffer.batch_size must be <= {MAX_BATCH_SIZE}, got {}",
                    self.buffer.batch_size
                ),
            });
        }
        if self.synchronizer.thread_name_prefix.trim().is_empty() {
            return Err(SyncError::InvalidConfig {
                details: "synchronizer.thread_name_prefix must not be empty".to_string(),
            });
        }
        if self.journal.enabled && self.journal.channel_capacity == 0 {
            return Err(SyncError::InvalidConfig {
                details: "journal.channel_capacity must be > 0 when the journal is enabled"
                    .to_string(),
            });
        }
        if self.journal.enabled && self.journal.max_size_bytes < 4096 {
            return Err(SyncError::InvalidConfig {
                details: format!(
                    "journal.max_size_bytes must be >= 4096, got {}",
                    self.journal.max_size_bytes
                ),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| SyncError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{Config, SyncError};
    use std::collections::HashMap;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.buffer.batch_size, 100);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut cfg = Config::default();
        cfg.buffer.batch_size = 0;
        let err = cfg.validate().expect_err("expected invalid batch size");
        match err {
            SyncError::InvalidConfig { details } => assert!(details.contains("batch_size")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn oversized_batch_rejected() {
        let mut cfg = Config::default();
        cfg.buffer.batch_size = super::MAX_BATCH_SIZE + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_sections_parse_with_defaults_for_missing_keys() {
        let cfg = Config::from_toml_str(
            r#"
            [buffer]
            batch_size = 25

            [journal]
            enabled = false
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.buffer.batch_size, 25);
        assert!(!cfg.journal.enabled);
        assert_eq!(cfg.synchronizer.yield_every, 64);
    }

    #[test]
    fn env_overrides_apply() {
        let env = vars(&[
            ("EVS_BUFFER_BATCH_SIZE", "7"),
            ("EVS_SYNC_THREAD_PREFIX", "scan"),
            ("EVS_DEBUG_LOCK_ORDER_CHECKS", "false"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .expect("overrides");
        assert_eq!(cfg.buffer.batch_size, 7);
        assert_eq!(cfg.synchronizer.thread_name_prefix, "scan");
        assert!(!cfg.debug.lock_order_checks);
    }

    #[test]
    fn malformed_env_override_reports_variable() {
        let env = vars(&[("EVS_BUFFER_BATCH_SIZE", "lots")]);
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .expect_err("expected parse failure");
        assert_eq!(err.code(), "EVS-1003");
        assert!(err.to_string().contains("EVS_BUFFER_BATCH_SIZE"));
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash");
        let mut changed = cfg;
        changed.buffer.batch_size = 42;
        assert_ne!(before, changed.stable_hash().expect("hash"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Config::load(Some(&dir.path().join("absent.toml"))).expect_err("missing");
        assert_eq!(err.code(), "EVS-1002");
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "[buffer]\nbatch_size = 12").expect("write");
        drop(file);

        let cfg = Config::load(Some(&path)).expect("load");
        assert_eq!(cfg.paths.config_file, path);
        // Env may override in CI; only assert when unset.
        if std::env::var("EVS_BUFFER_BATCH_SIZE").is_err() {
            assert_eq!(cfg.buffer.batch_size, 12);
        }
    }
}

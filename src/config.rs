//! Configuration for jsonlkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StoreError};
use crate::key::KeyPolicy;

/// Main configuration for a jsonlkv store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Path of the log file. Sidecar files are derived from it:
    ///   {log_path}           (records, one JSON object per line)
    ///   {log_path}.idx       (sorted key → byte offset index)
    ///   {log_path}.lock      (advisory writer lock)
    ///   {log_path}.compact   (staging file during save/compaction)
    pub log_path: PathBuf,

    /// Suffix appended to the log path to name the index file
    pub index_suffix: String,

    /// Suffix appended to the log path to name the lock file
    pub lock_suffix: String,

    /// Suffix appended to staged files before they are renamed into place
    pub staging_suffix: String,

    /// Capacity of read/write buffers (in bytes)
    pub buffer_size: usize,

    // -------------------------------------------------------------------------
    // Key Configuration
    // -------------------------------------------------------------------------
    /// How canonical key strings are decoded on read
    pub key_policy: KeyPolicy,

    // -------------------------------------------------------------------------
    // Durability / Concurrency Configuration
    // -------------------------------------------------------------------------
    /// When the log is fsynced
    pub sync_strategy: SyncStrategy,

    /// Take an exclusive flock on the lock file for the engine's lifetime
    pub advisory_lock: bool,
}

/// Log sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync the log after every mutation, before the index is persisted
    EveryWrite,

    /// fsync only staged files before they are published (save/compact)
    OnPublish,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("./data.jsonl"),
            index_suffix: ".idx".to_string(),
            lock_suffix: ".lock".to_string(),
            staging_suffix: ".compact".to_string(),
            buffer_size: 8 * 1024 * 1024, // 8 MB
            key_policy: KeyPolicy::Sniff,
            sync_strategy: SyncStrategy::EveryWrite,
            advisory_lock: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Path of the index file for this store
    pub fn index_path(&self) -> PathBuf {
        with_suffix(&self.log_path, &self.index_suffix)
    }

    /// Path of the lock file for this store
    pub fn lock_path(&self) -> PathBuf {
        with_suffix(&self.log_path, &self.lock_suffix)
    }

    /// Staging path for a file about to be replaced
    pub fn staging_path(&self, target: &std::path::Path) -> PathBuf {
        with_suffix(target, &self.staging_suffix)
    }

    /// Reject configurations that would make sidecar files collide
    pub fn validate(&self) -> Result<()> {
        if self.log_path.as_os_str().is_empty() {
            return Err(StoreError::Config("log_path is empty".to_string()));
        }
        for (name, suffix) in [
            ("index_suffix", &self.index_suffix),
            ("lock_suffix", &self.lock_suffix),
            ("staging_suffix", &self.staging_suffix),
        ] {
            if suffix.is_empty() {
                return Err(StoreError::Config(format!("{} must not be empty", name)));
            }
        }
        if self.index_suffix == self.lock_suffix
            || self.index_suffix == self.staging_suffix
            || self.lock_suffix == self.staging_suffix
        {
            return Err(StoreError::Config(
                "index, lock and staging suffixes must differ".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(StoreError::Config("buffer_size must be positive".to_string()));
        }
        Ok(())
    }
}

/// `path` with `suffix` appended to its final component ("a.jsonl" + ".idx")
fn with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the log file path
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_path = path.into();
        self
    }

    /// Set the index file suffix
    pub fn index_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.index_suffix = suffix.into();
        self
    }

    /// Set the lock file suffix
    pub fn lock_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.lock_suffix = suffix.into();
        self
    }

    /// Set the staging file suffix
    pub fn staging_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.staging_suffix = suffix.into();
        self
    }

    /// Set the buffer size (in bytes)
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Set the key decode policy
    pub fn key_policy(mut self, policy: KeyPolicy) -> Self {
        self.config.key_policy = policy;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Enable or disable the cross-process writer lock
    pub fn advisory_lock(mut self, enabled: bool) -> Self {
        self.config.advisory_lock = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

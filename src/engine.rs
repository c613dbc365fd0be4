//! Engine Module
//!
//! The per-store facade that coordinates the log, the index and compaction.
//!
//! ## Responsibilities
//! - Keep the in-memory index consistent with the log on every return
//! - Serialize mutations (single writer) and let readers share the index
//! - Rebuild the index whenever it cannot be trusted
//! - Hold the cross-process writer lock

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::compaction::{CompactionStats, Compactor};
use crate::config::Config;
use crate::error::{IoContext, Result};
use crate::index::{check_freshness, BuildReport, Freshness, Index};
use crate::key::{self, Key};
use crate::lock::FileLock;
use crate::log::{DeleteReport, EncodedRecord, RecordLog, Records, UpdateReport};
use crate::query::RangeQuery;

/// Summary of a store, for the directory layer that tracks many of them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    /// Path of the log file
    pub path: PathBuf,
    /// Log size in bytes, tombstones and padding included
    pub size_bytes: u64,
    /// Live records
    pub record_count: usize,
    /// Smallest live key
    pub min_key: Option<Key>,
    /// Largest live key
    pub max_key: Option<Key>,
}

/// How far the in-memory index can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    /// Nothing loaded yet; the index file may be used if fresh
    Unloaded,
    /// A mutation failed part-way; only a rescan of the log is trusted
    Distrusted,
    /// Matches the index file it was loaded from or persisted to
    Ready,
}

struct IndexState {
    index: Index,
    status: Status,
}

/// A single-file record store
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Mutations** (save/update/delete/compact/reindex) take the index write
///   lock for their whole duration, so they are serialized and never observed
///   half-applied through the index.
/// - **Indexed reads** (select/get/stats) share the read lock.
/// - **Full scans** (load) read the log without the index; a scan racing a
///   mutation may skip a line that is mid-rewrite.
/// - **Processes**: with `advisory_lock` set, only one engine per store can be
///   open at a time.
pub struct Engine {
    log: RecordLog,

    /// In-memory index and its trust level
    index: RwLock<IndexState>,

    /// Held for the engine's lifetime
    _lock: Option<FileLock>,
}

impl Engine {
    /// Open or create a store with the given config
    ///
    /// On startup:
    /// 1. Validate the config and create the parent directory
    /// 2. Take the writer lock
    /// 3. Create an empty log if none exists
    /// 4. Load the index file, or rebuild it if missing/stale/corrupt
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).at(parent)?;
            }
        }

        let lock = if config.advisory_lock {
            Some(FileLock::lock(&config.lock_path())?)
        } else {
            None
        };

        if !config.log_path.exists() {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.log_path)
                .at(&config.log_path)?;
            info!(path = %config.log_path.display(), "created empty log");
        }

        let engine = Self {
            log: RecordLog::new(config),
            index: RwLock::new(IndexState {
                index: Index::new(),
                status: Status::Unloaded,
            }),
            _lock: lock,
        };

        {
            let mut state = engine.index.write();
            engine.refresh(&mut state)?;
            info!(
                path = %engine.log_path().display(),
                keys = state.index.len(),
                "opened store"
            );
        }

        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified log path
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().log_path(path).build())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Replace the whole store with `records`.
    ///
    /// Records are written in ascending key order; an empty input produces an
    /// empty log and an empty index.
    pub fn save<I, K, V>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Serialize,
    {
        let encoded = encode_all(records)?;

        let mut state = self.index.write();
        match self.log.save(encoded) {
            Ok(published) => {
                state.index = published.index;
                state.status = Status::Ready;
                Ok(())
            }
            Err(e) => {
                state.status = Status::Distrusted;
                Err(e)
            }
        }
    }

    /// Insert or replace records.
    ///
    /// Every value is encoded before anything is written: a value that fails
    /// to serialize aborts the call with the log untouched.
    pub fn update<I, K, V>(&self, changes: I) -> Result<UpdateReport>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Serialize,
    {
        let encoded = encode_all(changes)?;

        let mut state = self.index.write();
        self.refresh(&mut state)?;
        let result = self.log.update(&mut state.index, encoded);
        Self::settle(&mut state, result)
    }

    /// Upsert a single record
    pub fn put<K: Into<Key>, V: Serialize>(&self, key: K, value: V) -> Result<UpdateReport> {
        self.update(std::iter::once((key, value)))
    }

    /// Tombstone the given keys; keys that are not live are ignored
    pub fn delete<I, K>(&self, keys: I) -> Result<DeleteReport>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let keys: Vec<String> = keys.into_iter().map(|k| key::encode(&k.into())).collect();

        let mut state = self.index.write();
        self.refresh(&mut state)?;
        let result = self.log.delete(&mut state.index, &keys);
        Self::settle(&mut state, result)
    }

    /// Tombstone every live key with `lower <= key <= upper`.
    ///
    /// A missing bound is open on that side.
    pub fn delete_range<L, U>(&self, lower: Option<L>, upper: Option<U>) -> Result<DeleteReport>
    where
        L: Into<Key>,
        U: Into<Key>,
    {
        let lower = lower.map(|k| key::encode(&k.into()));
        let upper = upper.map(|k| key::encode(&k.into()));

        let mut state = self.index.write();
        self.refresh(&mut state)?;
        let keys: Vec<String> = state
            .index
            .range(lower.as_deref(), upper.as_deref())
            .map(|(k, _)| k.to_string())
            .collect();
        debug!(count = keys.len(), "deleting key range");

        let result = self.log.delete(&mut state.index, &keys);
        Self::settle(&mut state, result)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Every live record, by full scan of the log
    pub fn load(&self) -> Result<Records> {
        self.log.load()
    }

    /// Records with `lower <= key <= upper`.
    ///
    /// - both bounds absent: same as [`Engine::load`]
    /// - equal bounds: single-key lookup
    /// - one bound absent: open on that side
    pub fn select<L, U>(&self, lower: Option<L>, upper: Option<U>) -> Result<Records>
    where
        L: Into<Key>,
        U: Into<Key>,
    {
        if lower.is_none() && upper.is_none() {
            return self.load();
        }

        let lower = lower.map(|k| key::encode(&k.into()));
        let upper = upper.map(|k| key::encode(&k.into()));

        let index = self.fresh_index()?;
        RangeQuery::new(&self.log, &index).select(lower.as_deref(), upper.as_deref())
    }

    /// Value of one key, if live
    pub fn get<K: Into<Key>>(&self, key: K) -> Result<Option<Value>> {
        let key = key::encode(&key.into());
        let index = self.fresh_index()?;
        RangeQuery::new(&self.log, &index).point(&key)
    }

    /// Byte offset of a key's current line, if live
    pub fn offset_of<K: Into<Key>>(&self, key: K) -> Result<Option<u64>> {
        let key = key::encode(&key.into());
        Ok(self.fresh_index()?.get(&key))
    }

    /// Size, record count and key range of the store
    pub fn stats(&self) -> Result<StoreStats> {
        let index = self.fresh_index()?;
        let path = self.log_path();
        let size_bytes = fs::metadata(path).at(path)?.len();
        let policy = self.log.config().key_policy;

        Ok(StoreStats {
            path: path.to_path_buf(),
            size_bytes,
            record_count: index.len(),
            min_key: index.min_key().map(|k| key::decode(k, policy)),
            max_key: index.max_key().map(|k| key::decode(k, policy)),
        })
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Rewrite the log in key order without tombstones or padding
    pub fn compact(&self) -> Result<CompactionStats> {
        let mut state = self.index.write();
        match Compactor::new(&self.log).compact() {
            Ok((index, stats)) => {
                state.index = index;
                state.status = Status::Ready;
                Ok(stats)
            }
            Err(e) => {
                state.status = Status::Distrusted;
                Err(e)
            }
        }
    }

    /// Rebuild the index from the log unconditionally
    pub fn reindex(&self) -> Result<BuildReport> {
        let mut state = self.index.write();
        let (index, report) = self.log.rebuild_index()?;
        state.index = index;
        state.status = Status::Ready;
        Ok(report)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the log file path
    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Get the index file path
    pub fn index_path(&self) -> &Path {
        self.log.index_path()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        self.log.config()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Read access to an index that agrees with the log
    fn fresh_index(&self) -> Result<MappedRwLockReadGuard<'_, Index>> {
        {
            let state = self.index.read();
            if self.freshness(&state)? == Freshness::Current {
                return Ok(RwLockReadGuard::map(state, |s| &s.index));
            }
        }

        let mut state = self.index.write();
        self.refresh(&mut state)?;
        let state = RwLockWriteGuard::downgrade(state);
        Ok(RwLockReadGuard::map(state, |s| &s.index))
    }

    fn freshness(&self, state: &IndexState) -> Result<Freshness> {
        let loaded = match state.status {
            Status::Distrusted => return Ok(Freshness::Rebuild),
            Status::Unloaded => None,
            Status::Ready => state.index.stamp(),
        };
        check_freshness(self.log.path(), self.log.index_path(), loaded)
    }

    /// Bring the in-memory index up to date (caller holds the write lock)
    fn refresh(&self, state: &mut IndexState) -> Result<()> {
        match self.freshness(state)? {
            Freshness::Current => return Ok(()),
            Freshness::Reload => {
                let path = self.log.path();
                let log_len = fs::metadata(path).at(path)?.len();
                if let Some(index) = Index::load(self.log.index_path(), log_len)? {
                    debug!(path = %self.log.index_path().display(), keys = index.len(), "loaded index");
                    state.index = index;
                    state.status = Status::Ready;
                    return Ok(());
                }
            }
            Freshness::Rebuild => {}
        }

        let (index, _) = self.log.rebuild_index()?;
        state.index = index;
        state.status = Status::Ready;
        Ok(())
    }

    /// Record the outcome of a mutation; failures distrust the index
    fn settle<T>(state: &mut IndexState, result: Result<T>) -> Result<T> {
        if result.is_err() {
            state.status = Status::Distrusted;
        }
        result
    }
}

/// Encode every record up front so that encoding failures write nothing
fn encode_all<I, K, V>(records: I) -> Result<Vec<EncodedRecord>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<Key>,
    V: Serialize,
{
    records
        .into_iter()
        .map(|(k, v)| EncodedRecord::encode(k, &v))
        .collect()
}

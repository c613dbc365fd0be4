//! Index File
//!
//! Persistence of the index sidecar and the staleness rules around it.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::error::{IoContext, Result, StoreError};

use super::Index;

/// Identity of an index file on disk, used to notice external rewrites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: SystemTime,
    pub len: u64,
}

impl FileStamp {
    /// Stamp of the file at `path`, or `None` if it does not exist
    pub fn of(path: &Path) -> Result<Option<FileStamp>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(FileStamp {
                modified: meta.modified().at(path)?,
                len: meta.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::storage(path, e)),
        }
    }
}

/// What has to happen before an in-memory index can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The in-memory copy matches the index file, which is newer than the log
    Current,

    /// The index file changed since it was loaded; read it again
    Reload,

    /// The index file is missing or older than the log; rescan the log
    Rebuild,
}

/// Compare the log and index files.
///
/// `loaded` is the stamp of the in-memory copy, if any. A missing log is
/// `NotFound`.
pub fn check_freshness(
    log_path: &Path,
    index_path: &Path,
    loaded: Option<&FileStamp>,
) -> Result<Freshness> {
    let log = FileStamp::of(log_path)?.ok_or_else(|| StoreError::NotFound {
        path: log_path.to_path_buf(),
    })?;

    let index = match FileStamp::of(index_path)? {
        Some(stamp) => stamp,
        None => return Ok(Freshness::Rebuild),
    };

    if log.modified > index.modified {
        return Ok(Freshness::Rebuild);
    }

    match loaded {
        Some(stamp) if *stamp == index => Ok(Freshness::Current),
        _ => Ok(Freshness::Reload),
    }
}

/// Load the index for `log_path`, rebuilding and persisting it first if it is
/// missing, unreadable or older than the log.
pub fn ensure_fresh(
    log_path: &Path,
    index_path: &Path,
    staging_path: &Path,
    buffer_size: usize,
) -> Result<Index> {
    if check_freshness(log_path, index_path, None)? == Freshness::Reload {
        let log_len = fs::metadata(log_path).at(log_path)?.len();
        if let Some(index) = Index::load(index_path, log_len)? {
            return Ok(index);
        }
    }

    let (mut index, _) = Index::build(log_path, buffer_size)?;
    index.persist(index_path, staging_path)?;
    Ok(index)
}

impl Index {
    /// Write the index to `index_path` via `staging_path` + rename.
    ///
    /// Updates the stamp to the one of the published file.
    pub fn persist(&mut self, index_path: &Path, staging_path: &Path) -> Result<()> {
        self.write_to(staging_path)?;
        fs::rename(staging_path, index_path).at(index_path)?;
        self.stamp = FileStamp::of(index_path)?;
        debug!(path = %index_path.display(), keys = self.len(), "persisted index");
        Ok(())
    }

    /// Serialize the index to `path` and fsync it
    pub(crate) fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path).at(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.entries)
            .map_err(|e| StoreError::storage(path, std::io::Error::other(e)))?;
        writer.write_all(b"\n").at(path)?;
        let file = writer
            .into_inner()
            .map_err(|e| StoreError::storage(path, e.into_error()))?;
        file.sync_all().at(path)?;
        Ok(())
    }

    /// Load an index file.
    ///
    /// Returns `Ok(None)` when the file is missing, fails to parse, or holds
    /// an offset past `log_len`; the caller should rebuild.
    pub fn load(index_path: &Path, log_len: u64) -> Result<Option<Index>> {
        let stamp = match FileStamp::of(index_path)? {
            Some(stamp) => stamp,
            None => return Ok(None),
        };
        let bytes = fs::read(index_path).at(index_path)?;

        let entries: BTreeMap<String, u64> = match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %index_path.display(), error = %e, "unreadable index file, ignoring");
                return Ok(None);
            }
        };

        if let Some((key, &offset)) = entries.iter().find(|(_, &off)| off >= log_len) {
            warn!(
                path = %index_path.display(),
                key = key.as_str(),
                offset,
                log_len,
                "index points past end of log, ignoring"
            );
            return Ok(None);
        }

        Ok(Some(Index {
            entries,
            stamp: Some(stamp),
        }))
    }
}

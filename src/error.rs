//! Error types for jsonlkv
//!
//! Provides a unified error type for all operations.
//!
//! Malformed lines already on disk are never reported here: readers skip them
//! and emit a `tracing` event instead.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for jsonlkv operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An open/seek/read/write/rename failed on a store file
    #[error("Storage error on {}: {}", .path.display(), .source)]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The log file is absent and the operation needs to read it
    #[error("Log file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    /// The index still disagrees with the log after a rebuild, which means
    /// something outside this engine is writing to the log
    #[error("Index entry for {key:?} does not match the log at offset {offset}")]
    IndexMismatch { key: String, offset: u64 },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    /// A record value could not be serialized
    #[error("Failed to encode value for key {key:?}: {source}")]
    Encoding {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    /// Another process holds the writer lock for this store
    #[error("Store is locked by another writer: {}", .path.display())]
    Locked { path: PathBuf },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Wrap an I/O error with the path it happened on
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return StoreError::NotFound { path };
        }
        StoreError::Storage { path, source }
    }

    /// Returns true for the `NotFound` variant
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Extension for attaching a path to `io::Result`
pub(crate) trait IoContext<T> {
    fn at(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| StoreError::storage(path, e))
    }
}

//! Storage: durable per-workload log traces.
//!
//! [`LogStorage`] is the capability the collector writes through and the
//! retrieval service falls back to. [`FsLogStorage`] keeps one directory per
//! workload id; [`NameIndex`] resolves human names to ids.

pub mod fs;
pub mod index;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::model::Workload;

pub use fs::FsLogStorage;
pub use index::NameIndex;

/// Destination of one workload's encoded records.
pub type LogWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Source of one workload's persisted records.
pub type LogReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No stored logs for: {0}")]
    NotFound(String),
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid workload metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Persistent log storage keyed by workload identity.
///
/// Object-safe so the collector and the retrieval service can share one
/// `Arc<dyn LogStorage>`.
pub trait LogStorage: Send + Sync {
    /// Opens the destination for `workload` and records its metadata so the
    /// trace stays reachable by name after a restart.
    fn create<'a>(
        &'a self,
        workload: &'a Workload,
    ) -> Pin<Box<dyn Future<Output = Result<LogWriter, StorageError>> + Send + 'a>>;

    /// Opens a stored trace by workload id, or by name through the index.
    fn open<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LogReader, StorageError>> + Send + 'a>>;
}

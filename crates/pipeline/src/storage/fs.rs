//! Filesystem storage.
//!
//! ```text
//! <root>/<id>/metadata.json     {"id": .., "name": .., "tty": ..}
//! <root>/<id>/<id>-json.log     one JSON record per line
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;

use futures_util::stream::{Stream, StreamExt, TryStreamExt};
use tokio::fs;
use tokio_stream::wrappers::ReadDirStream;
use tracing::{debug, info, warn};

use super::{LogReader, LogStorage, LogWriter, NameIndex, StorageError};
use crate::model::Workload;

const METADATA_FILE: &str = "metadata.json";

/// Stores each workload's trace under a directory named by its id.
#[derive(Debug)]
pub struct FsLogStorage {
    root: PathBuf,
    index: NameIndex,
}

impl FsLogStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: NameIndex::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &NameIndex {
        &self.index
    }

    fn workload_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn log_path(&self, id: &str) -> PathBuf {
        self.workload_dir(id).join(format!("{id}-json.log"))
    }

    /// Rebuilds the name index from persisted metadata.
    ///
    /// A missing root is an empty store. Unreadable or corrupt entries are
    /// skipped with a warning; a failure while listing the root keeps the
    /// mappings found so far. When several workloads share a name the one
    /// with the newest metadata wins. Returns the number of names indexed.
    pub async fn load_existing_mappings(&self) -> Result<usize, StorageError> {
        let entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(root = %self.root.display(), "Log directory does not exist yet");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let dirs = ReadDirStream::new(entries).map_ok(|entry| entry.path());
        let newest = newest_by_name(&self.root, dirs).await;

        let count = newest.len();
        for (name, (_, id)) in newest {
            self.index.insert(name, id);
        }
        info!(root = %self.root.display(), workloads = count, "Loaded stored log mappings");
        Ok(count)
    }

    async fn open_by_id(&self, id: &str) -> Result<Option<fs::File>, StorageError> {
        match fs::File::open(self.log_path(id)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reads the metadata under each directory and keeps, per name, the id with
/// the newest metadata file. Stops at the first listing error.
async fn newest_by_name<S>(root: &Path, mut dirs: S) -> HashMap<String, (SystemTime, String)>
where
    S: Stream<Item = io::Result<PathBuf>> + Unpin,
{
    let mut newest: HashMap<String, (SystemTime, String)> = HashMap::new();
    while let Some(dir) = dirs.next().await {
        let dir = match dir {
            Ok(dir) => dir,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Log directory scan stopped early");
                break;
            }
        };
        let path = dir.join(METADATA_FILE);
        let (workload, modified) = match read_metadata(&path).await {
            Ok(found) => found,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable workload metadata");
                continue;
            }
        };

        let replace = newest
            .get(&workload.name)
            .map_or(true, |(seen, _)| *seen <= modified);
        if replace {
            newest.insert(workload.name, (modified, workload.id));
        }
    }
    newest
}

async fn read_metadata(path: &Path) -> Result<(Workload, SystemTime), StorageError> {
    let raw = fs::read(path).await?;
    let workload: Workload = serde_json::from_slice(&raw)?;
    if !is_safe_key(&workload.id) {
        return Err(StorageError::InvalidKey(workload.id));
    }
    let modified = fs::metadata(path).await?.modified()?;
    Ok((workload, modified))
}

/// Keys become path components, so anything that could escape the root is
/// refused.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\', '\0'])
}

impl LogStorage for FsLogStorage {
    fn create<'a>(
        &'a self,
        workload: &'a Workload,
    ) -> Pin<Box<dyn Future<Output = Result<LogWriter, StorageError>> + Send + 'a>> {
        Box::pin(async move {
            if !is_safe_key(&workload.id) {
                return Err(StorageError::InvalidKey(workload.id.clone()));
            }

            let dir = self.workload_dir(&workload.id);
            fs::create_dir_all(&dir).await?;

            let metadata = serde_json::to_vec(workload)?;
            fs::write(dir.join(METADATA_FILE), metadata).await?;

            let file = fs::File::create(self.log_path(&workload.id)).await?;
            self.index.insert(workload.name.clone(), workload.id.clone());

            debug!(container_id = %workload.id, container_name = %workload.name, "Created log storage");
            Ok(Box::new(file) as LogWriter)
        })
    }

    fn open<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LogReader, StorageError>> + Send + 'a>> {
        Box::pin(async move {
            if !is_safe_key(key) {
                return Err(StorageError::NotFound(key.to_string()));
            }

            if let Some(file) = self.open_by_id(key).await? {
                return Ok(Box::new(file) as LogReader);
            }

            let Some(id) = self.index.resolve(key) else {
                return Err(StorageError::NotFound(key.to_string()));
            };
            match self.open_by_id(&id).await? {
                Some(file) => Ok(Box::new(file) as LogReader),
                None => Err(StorageError::NotFound(key.to_string())),
            }
        })
    }
}

//! Service: log retrieval, live first with a stored fallback.

use std::sync::Arc;

use futures_util::stream;
use thiserror::Error;
use tracing::debug;

use crate::model::Query;
use crate::monitor::{ContainerMonitor, MonitorError};
use crate::protocol::{replay, LogByteStream};
use crate::storage::{LogStorage, StorageError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("fetch live logs: {0}")]
    Monitor(#[source] MonitorError),
    #[error("open stored logs: {0}")]
    Storage(#[source] StorageError),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound(_))
    }
}

/// Serves filtered log streams for a workload name or id.
pub struct LogService {
    monitor: Arc<dyn ContainerMonitor>,
    storage: Arc<dyn LogStorage>,
}

impl LogService {
    pub fn new(monitor: Arc<dyn ContainerMonitor>, storage: Arc<dyn LogStorage>) -> Self {
        Self { monitor, storage }
    }

    /// Live logs when the engine knows the workload, the stored trace when
    /// it does not. Only a not-found from the engine triggers the fallback.
    pub async fn get_logs(&self, query: &Query) -> Result<LogByteStream, ServiceError> {
        let selection = query.selection();
        if selection.is_empty() {
            return Ok(Box::pin(stream::empty()));
        }

        let live = Query {
            timestamps: false,
            ..query.clone()
        };
        match self.monitor.fetch_raw_log_stream(&live).await {
            Ok(raw) => Ok(raw.demux(selection)),
            Err(MonitorError::NotFound(_)) => {
                debug!(container_name = %query.container_name, "Container not running, reading stored logs");
                let reader = self.storage.open(&query.container_name).await.map_err(|e| match e {
                    StorageError::NotFound(_) => ServiceError::NotFound(query.container_name.clone()),
                    other => ServiceError::Storage(other),
                })?;
                Ok(replay(reader, selection))
            }
            Err(e) => Err(ServiceError::Monitor(e)),
        }
    }
}

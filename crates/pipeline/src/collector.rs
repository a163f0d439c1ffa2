//! Collector: discovers workloads and copies their live logs into storage.
//!
//! ```text
//! Idle → Discovering → Watching → Shutdown
//! ```
//!
//! Every captured workload gets its own task. Tasks share a child
//! cancellation token and a [`TaskTracker`]; `run` joins all of them before
//! it reports [`CollectorState::Shutdown`].

use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashSet;
use futures_util::stream::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::LogError;
use crate::model::{Channel, Query, Workload};
use crate::monitor::{ContainerMonitor, MonitorError};
use crate::record::{CodecError, LineEncoder, LogRecord, RecordCodec};
use crate::storage::{LogStorage, LogWriter, StorageError};

/// Optional collector behaviour.
#[derive(Debug, Clone, Default)]
pub struct CollectorOptions {
    /// Names of the workloads to capture. Empty captures all of them.
    pub containers: Vec<String>,
}

impl CollectorOptions {
    fn allows(&self, workload: &Workload) -> bool {
        self.containers.is_empty() || self.containers.iter().any(|name| *name == workload.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Discovering,
    Watching,
    Shutdown,
}

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("discover running containers: {0}")]
    Discover(#[source] MonitorError),
    #[error("watch containers: {0}")]
    Watch(#[source] MonitorError),
}

/// Why a single capture stopped early. Logged, never propagated.
#[derive(Error, Debug)]
enum CaptureError {
    #[error("fetch container logs: {0}")]
    Fetch(#[from] MonitorError),
    #[error("create log file: {0}")]
    Storage(#[from] StorageError),
    #[error("read container logs: {0}")]
    Read(#[from] LogError),
    #[error("encode log record: {0}")]
    Encode(#[from] CodecError),
    #[error("write log file: {0}")]
    Write(#[from] std::io::Error),
}

pub struct Collector {
    monitor: Arc<dyn ContainerMonitor>,
    storage: Arc<dyn LogStorage>,
    options: CollectorOptions,
    in_flight: Arc<DashSet<String>>,
    state_tx: watch::Sender<CollectorState>,
}

impl Collector {
    pub fn new(
        monitor: Arc<dyn ContainerMonitor>,
        storage: Arc<dyn LogStorage>,
        options: CollectorOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(CollectorState::Idle);
        Self {
            monitor,
            storage,
            options,
            in_flight: Arc::new(DashSet::new()),
            state_tx,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CollectorState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> CollectorState {
        *self.state_tx.borrow()
    }

    /// Ids of the workloads currently being captured.
    pub fn capturing(&self) -> Vec<String> {
        self.in_flight.iter().map(|id| id.key().clone()).collect()
    }

    /// Discovers running workloads, then watches for new ones until `cancel`
    /// fires or the watch fails. Returns after every capture task has exited.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), CollectorError> {
        let tasks_cancel = cancel.child_token();
        let tracker = TaskTracker::new();

        let result = self.discover_and_watch(&cancel, &tasks_cancel, &tracker).await;

        info!("Log collector shutting down");
        tasks_cancel.cancel();
        tracker.close();
        tracker.wait().await;
        self.state_tx.send_replace(CollectorState::Shutdown);
        info!("Log collector stopped");

        result
    }

    async fn discover_and_watch(
        &self,
        cancel: &CancellationToken,
        tasks_cancel: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Result<(), CollectorError> {
        self.state_tx.send_replace(CollectorState::Discovering);
        // Subscribed before listing so a start in between is not lost;
        // in-flight dedup absorbs the overlap.
        let mut events = self.monitor.watch_starts();
        let workloads = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            listed = self.monitor.list_workloads() => listed.map_err(CollectorError::Discover)?,
        };
        info!(count = workloads.len(), "Discovered running containers");
        for workload in workloads {
            self.spawn_capture(workload, tasks_cancel, tracker);
        }

        self.state_tx.send_replace(CollectorState::Watching);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                event = events.next() => match event {
                    Some(Ok(workload)) => {
                        debug!(container_id = %workload.id, container_name = %workload.name, "Container started");
                        self.spawn_capture(workload, tasks_cancel, tracker);
                    }
                    Some(Err(e)) => return Err(CollectorError::Watch(e)),
                    None => {
                        info!("Container event stream closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn spawn_capture(&self, workload: Workload, cancel: &CancellationToken, tracker: &TaskTracker) {
        if !self.options.allows(&workload) {
            debug!(container_name = %workload.name, "Container not in allow-list, skipping");
            return;
        }
        if !self.in_flight.insert(workload.id.clone()) {
            debug!(container_id = %workload.id, container_name = %workload.name, "Already collecting logs");
            return;
        }

        let monitor = Arc::clone(&self.monitor);
        let storage = Arc::clone(&self.storage);
        let in_flight = Arc::clone(&self.in_flight);
        let cancel = cancel.clone();

        tracker.spawn(async move {
            info!(
                container_id = %workload.id,
                container_name = %workload.name,
                tty = workload.tty,
                "Start collecting logs"
            );
            match capture(monitor.as_ref(), storage.as_ref(), &workload, &cancel).await {
                Ok(()) => info!(
                    container_id = %workload.id,
                    container_name = %workload.name,
                    "Stopped collecting logs"
                ),
                Err(e) => error!(
                    container_id = %workload.id,
                    container_name = %workload.name,
                    error = %e,
                    "Stopped collecting logs"
                ),
            }
            in_flight.remove(&workload.id);
        });
    }
}

/// Copies one workload's live stream into storage, a line record at a time.
async fn capture(
    monitor: &dyn ContainerMonitor,
    storage: &dyn LogStorage,
    workload: &Workload,
    cancel: &CancellationToken,
) -> Result<(), CaptureError> {
    let query = Query::capture(workload);
    let raw = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        raw = monitor.fetch_raw_log_stream(&query) => raw?,
    };
    let mut writer = storage.create(workload).await?;

    let mut stdout = LineEncoder::new(Channel::Stdout);
    let mut stderr = LineEncoder::new(Channel::Stderr);
    let mut codec = RecordCodec::new();
    let mut buf = BytesMut::new();

    let mut chunks = raw.into_chunks();
    let copied = loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            chunk = chunks.next() => chunk,
        };
        let chunk = match chunk {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => break Err(CaptureError::from(e)),
            None => break Ok(()),
        };

        let encoder = match chunk.channel {
            Channel::Stdout => &mut stdout,
            Channel::Stderr => &mut stderr,
        };
        if let Err(e) = write_records(&mut writer, &mut codec, &mut buf, encoder.push(&chunk.payload)).await {
            break Err(e);
        }
    };
    drop(chunks);

    let tail = [stdout.finish(), stderr.finish()].into_iter().flatten().collect();
    let flushed = write_records(&mut writer, &mut codec, &mut buf, tail).await;
    writer.shutdown().await?;
    copied.and(flushed)
}

async fn write_records(
    writer: &mut LogWriter,
    codec: &mut RecordCodec,
    buf: &mut BytesMut,
    records: Vec<LogRecord>,
) -> Result<(), CaptureError> {
    if records.is_empty() {
        return Ok(());
    }
    for record in records {
        codec.encode(record, buf)?;
    }
    writer.write_all(&buf.split()).await?;
    Ok(())
}

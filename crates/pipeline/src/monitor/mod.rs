//! Monitor: the container engine as seen by the collector and retrieval.
//!
//! [`ContainerMonitor`] is the capability interface; [`DockerMonitor`] is the
//! bollard-backed adapter and [`FakeMonitor`] an in-memory double.

pub mod docker;
pub mod fake;

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{Stream, TryStreamExt};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::error::LogError;
use crate::model::{Query, Workload};
use crate::protocol::{self, ChannelSelection, Chunk, FrameCodec, LogByteStream};

pub use docker::DockerMonitor;
pub use fake::FakeMonitor;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Docker connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Bollard error: {0}")]
    BollardError(#[from] bollard::errors::Error),
    #[error("{0}")]
    Other(String),
}

impl MonitorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MonitorError::NotFound(_))
    }
}

/// Workloads reported as started, in event order. An `Err` item is fatal
/// and ends the watch.
pub type WorkloadEvents = Pin<Box<dyn Stream<Item = Result<Workload, MonitorError>> + Send>>;

/// Channel-tagged chunks decoded from a raw stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, LogError>> + Send>>;

/// Raw engine output for one workload: framed, or plain bytes for TTYs.
pub struct RawLogStream {
    pub tty: bool,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl RawLogStream {
    pub fn new(tty: bool, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            tty,
            reader: Box::new(reader),
        }
    }

    pub fn into_chunks(self) -> ChunkStream {
        Box::pin(FramedRead::new(self.reader, FrameCodec::new(self.tty)).map_err(LogError::from))
    }

    pub fn demux(self, selection: ChannelSelection) -> LogByteStream {
        protocol::demux(self.reader, self.tty, selection)
    }
}

impl std::fmt::Debug for RawLogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawLogStream").field("tty", &self.tty).finish_non_exhaustive()
    }
}

/// Async interface over the container engine.
pub trait ContainerMonitor: Send + Sync {
    /// Running workloads at the time of the call.
    fn list_workloads(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Workload>, MonitorError>> + Send + '_>>;

    /// Start events from the time of the call, even when the stream is
    /// first polled later.
    fn watch_starts(&self) -> WorkloadEvents;

    /// Raw log stream for `query.container_name` (name or id). Reports
    /// [`MonitorError::NotFound`] when the engine does not know the workload.
    fn fetch_raw_log_stream<'a>(
        &'a self,
        query: &'a Query,
    ) -> Pin<Box<dyn Future<Output = Result<RawLogStream, MonitorError>> + Send + 'a>>;
}

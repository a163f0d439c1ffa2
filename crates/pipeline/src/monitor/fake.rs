//! Fake: test double for the container engine.
//!
//! [`FakeMonitor`] implements [`ContainerMonitor`] over in-memory state:
//! canned workloads, canned raw log bytes (finite, or endless until
//! dropped), a controllable start-event feed, and failure switches.
//! Start events only reach a watch that exists when they are emitted.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::Encoder;
use tokio_util::io::StreamReader;

use super::{ContainerMonitor, MonitorError, RawLogStream, WorkloadEvents};
use crate::model::{Channel, Query, Workload};
use crate::protocol::{Chunk, FrameCodec};

/// Encodes `(channel, payload)` pairs into the engine's framed wire format.
pub fn encode_frames(frames: &[(Channel, &str)]) -> Vec<u8> {
    let mut codec = FrameCodec::multiplexed();
    let mut buf = BytesMut::new();
    for (channel, payload) in frames {
        let chunk = Chunk::new(*channel, Bytes::copy_from_slice(payload.as_bytes()));
        // Payloads here are far below the 4 GiB frame limit.
        let _ = codec.encode(chunk, &mut buf);
    }
    buf.to_vec()
}

// ── In-memory state ─────────────────────────────────────────────

#[derive(Clone, Debug)]
struct CannedLogs {
    tty: bool,
    bytes: Vec<u8>,
    endless: bool,
}

#[derive(Default)]
struct Inner {
    workloads: Vec<Workload>,
    logs: HashMap<String, CannedLogs>,
    list_error: Option<String>,
    fetch_errors: HashMap<String, String>,
    fetched: Vec<Query>,
    starts_on_list: Vec<Workload>,
}

type EventSender = mpsc::UnboundedSender<Result<Workload, MonitorError>>;

/// A fake engine for deterministic testing.
pub struct FakeMonitor {
    inner: Mutex<Inner>,
    events_tx: std::sync::Mutex<Option<EventSender>>,
    open_streams: Arc<AtomicUsize>,
}

impl FakeMonitor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            events_tx: std::sync::Mutex::new(None),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Seed a running workload.
    pub async fn add_workload(&self, workload: Workload) {
        self.inner.lock().await.workloads.push(workload);
    }

    /// Serve `bytes` for the workload (by id or name), then end the stream.
    pub async fn set_logs(&self, workload: &Workload, bytes: impl Into<Vec<u8>>) {
        self.insert_logs(workload, bytes.into(), false).await;
    }

    /// Serve `bytes` for the workload, then stay open until dropped.
    pub async fn set_endless_logs(&self, workload: &Workload, bytes: impl Into<Vec<u8>>) {
        self.insert_logs(workload, bytes.into(), true).await;
    }

    async fn insert_logs(&self, workload: &Workload, bytes: Vec<u8>, endless: bool) {
        let canned = CannedLogs {
            tty: workload.tty,
            bytes,
            endless,
        };
        let mut state = self.inner.lock().await;
        state.logs.insert(workload.id.clone(), canned.clone());
        state.logs.insert(workload.name.clone(), canned);
    }

    /// Make `list_workloads` fail.
    pub async fn fail_listing(&self, message: &str) {
        self.inner.lock().await.list_error = Some(message.to_string());
    }

    /// Make fetching `key` fail with a non-not-found error.
    pub async fn fail_fetch(&self, key: &str, message: &str) {
        self.inner
            .lock()
            .await
            .fetch_errors
            .insert(key.to_string(), message.to_string());
    }

    /// Emit a start event while the next listing is in progress.
    pub async fn emit_start_on_list(&self, workload: Workload) {
        self.inner.lock().await.starts_on_list.push(workload);
    }

    /// Queries passed to `fetch_raw_log_stream`, in call order.
    pub async fn fetched(&self) -> Vec<Query> {
        self.inner.lock().await.fetched.clone()
    }

    /// Deliver a start event to the active watch.
    pub fn emit_start(&self, workload: Workload) {
        self.send_event(Ok(workload));
    }

    /// Deliver a fatal error to the active watch.
    pub fn fail_watch(&self, message: &str) {
        self.send_event(Err(MonitorError::Other(message.to_string())));
    }

    /// End the watch stream without an error.
    pub fn close_watch(&self) {
        if let Ok(mut tx) = self.events_tx.lock() {
            tx.take();
        }
    }

    fn send_event(&self, event: Result<Workload, MonitorError>) {
        if let Ok(tx) = self.events_tx.lock() {
            if let Some(tx) = tx.as_ref() {
                let _ = tx.send(event);
            }
        }
    }

    /// Raw streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

impl Default for FakeMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader that keeps the fake's open-stream count.
struct TrackedReader<R> {
    inner: R,
    open: Arc<AtomicUsize>,
}

impl<R> TrackedReader<R> {
    fn new(inner: R, open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { inner, open }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TrackedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<R> Drop for TrackedReader<R> {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

// ── ContainerMonitor implementation ─────────────────────────────

impl ContainerMonitor for FakeMonitor {
    fn list_workloads(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Workload>, MonitorError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            if let Some(message) = &state.list_error {
                return Err(MonitorError::ConnectionFailed(message.clone()));
            }
            for workload in std::mem::take(&mut state.starts_on_list) {
                self.emit_start(workload);
            }
            Ok(state.workloads.clone())
        })
    }

    fn watch_starts(&self) -> WorkloadEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut events_tx) = self.events_tx.lock() {
            *events_tx = Some(tx);
        }
        Box::pin(UnboundedReceiverStream::new(rx))
    }

    fn fetch_raw_log_stream<'a>(
        &'a self,
        query: &'a Query,
    ) -> Pin<Box<dyn Future<Output = Result<RawLogStream, MonitorError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.fetched.push(query.clone());

            let key = query.container_name.as_str();
            if let Some(message) = state.fetch_errors.get(key) {
                return Err(MonitorError::Other(message.clone()));
            }

            let canned = match state.logs.get(key) {
                Some(canned) => canned.clone(),
                None => {
                    let workload = state
                        .workloads
                        .iter()
                        .find(|w| w.id == key || w.name == key)
                        .ok_or_else(|| MonitorError::NotFound(key.to_string()))?;
                    CannedLogs {
                        tty: workload.tty,
                        bytes: Vec::new(),
                        endless: false,
                    }
                }
            };

            let first = stream::iter([Ok(Bytes::from(canned.bytes))]);
            let bytes: ByteStream = if canned.endless && query.follow {
                Box::pin(first.chain(stream::pending()))
            } else {
                Box::pin(first)
            };
            let reader = TrackedReader::new(StreamReader::new(bytes), Arc::clone(&self.open_streams));
            Ok(RawLogStream::new(canned.tty, reader))
        })
    }
}

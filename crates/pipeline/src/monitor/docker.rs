//! Docker monitor: the engine adapter over bollard.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;

use bollard::container::LogOutput;
use bollard::models::ContainerInspectResponse;
use bollard::query_parameters::{EventsOptionsBuilder, ListContainersOptions, LogsOptions};
use bollard::Docker;
use bytes::{Bytes, BytesMut};
use futures_util::stream::StreamExt;
use tokio_util::codec::Encoder;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::{ContainerMonitor, MonitorError, RawLogStream, WorkloadEvents};
use crate::model::{Channel, Query, Workload};
use crate::protocol::{Chunk, FrameCodec};

#[derive(Debug, Clone)]
pub struct DockerMonitor {
    client: Docker,
}

impl DockerMonitor {
    /// Connects to the daemon at `socket_path`, or to the one described by
    /// the environment when the path is empty.
    pub fn new(socket_path: &str) -> Result<Self, MonitorError> {
        let client = if socket_path.is_empty() {
            Docker::connect_with_defaults()
                .map_err(|e| MonitorError::ConnectionFailed(e.to_string()))?
        } else {
            let clean_path = socket_path.trim_start_matches("unix://");
            Docker::connect_with_socket(clean_path, 120, &bollard::API_DEFAULT_VERSION)
                .map_err(|e| MonitorError::ConnectionFailed(e.to_string()))?
        };
        Ok(Self { client })
    }

    async fn inspect(&self, key: &str) -> Result<Workload, MonitorError> {
        inspect_workload(&self.client, key).await
    }
}

async fn inspect_workload(client: &Docker, key: &str) -> Result<Workload, MonitorError> {
    let details = client
        .inspect_container(key, None)
        .await
        .map_err(|e| match e {
            bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                MonitorError::NotFound(key.to_string())
            }
            other => MonitorError::BollardError(other),
        })?;
    Ok(workload_from_inspect(details, key))
}

fn workload_from_inspect(details: ContainerInspectResponse, key: &str) -> Workload {
    // Names are stored as paths for historical reasons.
    let name = details
        .name
        .as_deref()
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    let tty = details
        .config
        .as_ref()
        .and_then(|c| c.tty)
        .unwrap_or(false);
    Workload {
        id: details.id.unwrap_or_else(|| key.to_string()),
        name,
        tty,
    }
}

/// Re-frames a bollard chunk so the protocol layer sees engine wire bytes.
fn reframe(codec: &mut FrameCodec, output: LogOutput) -> io::Result<Bytes> {
    let (channel, message) = match output {
        LogOutput::StdOut { message } | LogOutput::StdIn { message } => (Channel::Stdout, message),
        LogOutput::StdErr { message } => (Channel::Stderr, message),
        LogOutput::Console { message } => (Channel::Stdout, message),
    };
    let mut buf = BytesMut::with_capacity(message.len() + crate::protocol::HEADER_LEN);
    codec
        .encode(Chunk::new(channel, message), &mut buf)
        .map_err(io::Error::other)?;
    Ok(buf.freeze())
}

impl ContainerMonitor for DockerMonitor {
    fn list_workloads(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Workload>, MonitorError>> + Send + '_>> {
        Box::pin(async move {
            let options = ListContainersOptions {
                all: false,
                ..Default::default()
            };
            let summaries = self.client.list_containers(Some(options)).await?;

            let mut workloads = Vec::with_capacity(summaries.len());
            for summary in summaries {
                let Some(id) = summary.id else { continue };
                match self.inspect(&id).await {
                    Ok(workload) => workloads.push(workload),
                    // Removed between list and inspect.
                    Err(MonitorError::NotFound(_)) => {
                        debug!(container_id = %id, "Container vanished during discovery");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(workloads)
        })
    }

    fn watch_starts(&self) -> WorkloadEvents {
        let client = self.client.clone();
        // The request goes out on first poll; `since` replays starts from now.
        let since = chrono::Utc::now().timestamp().to_string();
        let stream = async_stream::try_stream! {
            let mut filters = HashMap::new();
            filters.insert("type", vec!["container"]);
            filters.insert("event", vec!["start"]);
            let options = EventsOptionsBuilder::default()
                .since(&since)
                .filters(&filters)
                .build();

            let mut events = client.events(Some(options));
            while let Some(event) = events.next().await {
                let event = event?;
                let Some(actor) = event.actor else { continue };
                let Some(id) = actor.id else { continue };
                let name = actor
                    .attributes
                    .as_ref()
                    .and_then(|attrs| attrs.get("name"))
                    .cloned()
                    .unwrap_or_default();

                let tty = match inspect_workload(&client, &id).await {
                    Ok(workload) => workload.tty,
                    Err(e) => {
                        warn!(container_id = %id, error = %e, "Failed to inspect started container, assuming no TTY");
                        false
                    }
                };

                yield Workload { id, name, tty };
            }
        };
        Box::pin(stream)
    }

    fn fetch_raw_log_stream<'a>(
        &'a self,
        query: &'a Query,
    ) -> Pin<Box<dyn Future<Output = Result<RawLogStream, MonitorError>> + Send + 'a>> {
        Box::pin(async move {
            let workload = self.inspect(&query.container_name).await?;

            let options = LogsOptions {
                follow: query.follow,
                stdout: query.include_stdout,
                stderr: query.include_stderr,
                since: 0,
                until: 0,
                timestamps: query.timestamps,
                tail: "all".to_string(),
            };

            let mut codec = FrameCodec::new(workload.tty);
            let bytes = self
                .client
                .logs(&workload.id, Some(options))
                .map(move |result| match result {
                    Ok(output) => reframe(&mut codec, output),
                    Err(e) => Err(io::Error::other(e)),
                });

            debug!(
                container_id = %workload.id,
                container_name = %workload.name,
                tty = workload.tty,
                follow = query.follow,
                "Fetching container logs"
            );
            Ok(RawLogStream::new(workload.tty, StreamReader::new(Box::pin(bytes))))
        })
    }
}

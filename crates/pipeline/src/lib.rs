// Log capture and retrieval core of the container log proxy.

// Wire formats
pub mod protocol;
pub mod record;

// Domain
pub mod error;
pub mod model;

// Backends
pub mod monitor;
pub mod storage;

// Orchestration
pub mod collector;
pub mod service;

pub use collector::{Collector, CollectorError, CollectorOptions, CollectorState};
pub use error::LogError;
pub use model::{Channel, Query, Workload};
pub use monitor::{ContainerMonitor, DockerMonitor, MonitorError};
pub use protocol::{ChannelSelection, LogByteStream};
pub use service::{LogService, ServiceError};
pub use storage::{FsLogStorage, LogStorage, StorageError};

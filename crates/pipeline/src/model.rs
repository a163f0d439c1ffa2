//! Model: workload identity, output channels and log queries.

use serde::{Deserialize, Serialize};

use crate::protocol::ChannelSelection;

/// A container known to the engine.
///
/// `id` is stable for the container's lifetime; `name` is assigned by humans
/// and may be reused by a later container once this one is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    pub name: String,
    /// A pseudo-TTY is allocated: the engine sends raw output, not frames.
    pub tty: bool,
}

impl Workload {
    pub fn new(id: impl Into<String>, name: impl Into<String>, tty: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tty,
        }
    }
}

/// Output channel of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a single log request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Container name or id.
    pub container_name: String,
    pub include_stdout: bool,
    pub include_stderr: bool,
    /// Keep the stream open and deliver new output as it is produced.
    pub follow: bool,
    /// Ask the engine to prefix every line with its RFC 3339 timestamp.
    pub timestamps: bool,
}

impl Query {
    /// Query used by capture tasks: both channels, followed, timestamped,
    /// addressed by id so a reused name can never redirect the capture.
    pub fn capture(workload: &Workload) -> Self {
        Self {
            container_name: workload.id.clone(),
            include_stdout: true,
            include_stderr: true,
            follow: true,
            timestamps: true,
        }
    }

    pub fn selection(&self) -> ChannelSelection {
        ChannelSelection {
            stdout: self.include_stdout,
            stderr: self.include_stderr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_query_includes_everything() {
        let workload = Workload::new("abc123", "web", false);
        let query = Query::capture(&workload);
        assert_eq!(query.container_name, "abc123");
        assert!(query.include_stdout && query.include_stderr);
        assert!(query.follow);
        assert!(query.timestamps);
    }

    #[test]
    fn test_channel_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Channel::Stdout).unwrap(), "\"stdout\"");
        assert_eq!(serde_json::to_string(&Channel::Stderr).unwrap(), "\"stderr\"");
    }

    #[test]
    fn test_workload_metadata_shape() {
        let json = serde_json::to_value(Workload::new("abc", "web", true)).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["name"], "web");
        assert_eq!(json["tty"], true);
    }
}

//! Error: item error of every filtered log byte stream.

use thiserror::Error;

use crate::protocol::FrameError;
use crate::record::CodecError;

/// Failure while producing a filtered log stream, live or replayed.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("log record error: {0}")]
    Record(#[from] CodecError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

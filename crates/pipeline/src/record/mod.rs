//! Record: the persisted, line-delimited representation of captured logs.

pub mod codec;
pub mod line;

pub use codec::{CodecError, LogRecord, RecordCodec};
pub use line::{split_timestamp, LineEncoder};

//! Protocol: the engine's multiplexed log framing and channel filtering.
//!
//! A live log stream is either raw TTY output (one undifferentiated channel)
//! or a sequence of frames, each an 8-byte header followed by its payload:
//!
//! ```text
//! [selector:1][reserved:3][length:4, big-endian][payload:length]
//! ```
//!
//! [`frame`] turns bytes into channel-tagged [`Chunk`]s; [`filter`] keeps the
//! selected channels and is shared by the live and the replayed branch.

pub mod filter;
pub mod frame;

pub use filter::{demux, replay, select_channels, ChannelSelection, LogByteStream};
pub use frame::{Chunk, FrameCodec, FrameError, HEADER_LEN};

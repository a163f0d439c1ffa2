//! Frame: decoder (and encoder) for the engine's multiplexed log stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::model::Channel;

/// Size of a frame header: selector, 3 reserved bytes, big-endian length.
pub const HEADER_LEN: usize = 8;

// Upper bound on a single up-front buffer reservation. The length field is
// untrusted, the buffer still grows as bytes actually arrive.
const MAX_RESERVE: usize = 64 * 1024;

const SELECTOR_STDIN: u8 = 0;
const SELECTOR_STDOUT: u8 = 1;
const SELECTOR_STDERR: u8 = 2;
const SELECTOR_SYSTEM: u8 = 3;

/// One channel-tagged piece of log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub channel: Channel,
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(channel: Channel, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("truncated frame header: {available} of {HEADER_LEN} bytes")]
    TruncatedHeader { available: usize },
    #[error("truncated frame payload: {available} of {expected} bytes")]
    TruncatedPayload { expected: usize, available: usize },
    #[error("unknown stream selector: {0}")]
    UnknownChannel(u8),
    #[error("engine reported an error: {0}")]
    Engine(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decodes a raw engine log stream into [`Chunk`]s.
///
/// In TTY mode headers are never inspected: every byte belongs to stdout and
/// is emitted as soon as it is read. Otherwise frames are decoded in arrival
/// order, zero-length frames are consumed without producing a chunk, and
/// end-of-source inside a header or payload is a [`FrameError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    tty: bool,
}

impl FrameCodec {
    pub fn new(tty: bool) -> Self {
        Self { tty }
    }

    pub fn multiplexed() -> Self {
        Self::new(false)
    }

    pub fn tty() -> Self {
        Self::new(true)
    }

    pub fn is_tty(&self) -> bool {
        self.tty
    }
}

fn payload_len(header: &[u8]) -> usize {
    u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize
}

impl Decoder for FrameCodec {
    type Item = Chunk;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Chunk>, FrameError> {
        if self.tty {
            if src.is_empty() {
                return Ok(None);
            }
            return Ok(Some(Chunk::new(Channel::Stdout, src.split().freeze())));
        }

        loop {
            if src.len() < HEADER_LEN {
                return Ok(None);
            }

            let selector = src[0];
            if selector > SELECTOR_SYSTEM {
                return Err(FrameError::UnknownChannel(selector));
            }

            let len = payload_len(&src[..HEADER_LEN]);
            let frame_len = HEADER_LEN.saturating_add(len);
            if src.len() < frame_len {
                src.reserve((frame_len - src.len()).min(MAX_RESERVE));
                return Ok(None);
            }

            src.advance(HEADER_LEN);
            let payload = src.split_to(len).freeze();

            let channel = match selector {
                SELECTOR_STDIN | SELECTOR_STDOUT => Channel::Stdout,
                SELECTOR_STDERR => Channel::Stderr,
                _ => {
                    let message = String::from_utf8_lossy(&payload);
                    return Err(FrameError::Engine(message.trim_end().to_string()));
                }
            };

            if payload.is_empty() {
                continue;
            }
            return Ok(Some(Chunk { channel, payload }));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Chunk>, FrameError> {
        if let Some(chunk) = self.decode(src)? {
            return Ok(Some(chunk));
        }
        if src.is_empty() {
            return Ok(None);
        }
        if src.len() < HEADER_LEN {
            return Err(FrameError::TruncatedHeader { available: src.len() });
        }
        Err(FrameError::TruncatedPayload {
            expected: payload_len(&src[..HEADER_LEN]),
            available: src.len() - HEADER_LEN,
        })
    }
}

impl Encoder<Chunk> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, chunk: Chunk, dst: &mut BytesMut) -> Result<(), FrameError> {
        if self.tty {
            dst.extend_from_slice(&chunk.payload);
            return Ok(());
        }

        let len = u32::try_from(chunk.payload.len()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame payload exceeds 4 GiB")
        })?;
        let selector = match chunk.channel {
            Channel::Stdout => SELECTOR_STDOUT,
            Channel::Stderr => SELECTOR_STDERR,
        };

        dst.reserve(HEADER_LEN + chunk.payload.len());
        dst.put_u8(selector);
        dst.put_bytes(0, 3);
        dst.put_u32(len);
        dst.extend_from_slice(&chunk.payload);
        Ok(())
    }
}

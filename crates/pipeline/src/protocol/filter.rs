//! Filter: channel selection over live and replayed log sources.
//!
//! Both retrieval branches reduce their source to a stream of [`Chunk`]s and
//! pass it through [`select_channels`], so a caller observes the same
//! selection behaviour whichever branch served the request.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::future;
use futures_util::stream::{Stream, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use super::frame::{Chunk, FrameCodec};
use crate::error::LogError;
use crate::model::Channel;
use crate::record::{LogRecord, RecordCodec};

/// Filtered log output, pulled on demand. Dropping it releases the source.
pub type LogByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, LogError>> + Send>>;

/// Which channels a caller wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSelection {
    pub stdout: bool,
    pub stderr: bool,
}

impl ChannelSelection {
    pub const ALL: Self = Self {
        stdout: true,
        stderr: true,
    };

    pub const NONE: Self = Self {
        stdout: false,
        stderr: false,
    };

    pub fn includes(&self, channel: Channel) -> bool {
        match channel {
            Channel::Stdout => self.stdout,
            Channel::Stderr => self.stderr,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.stdout && !self.stderr
    }
}

/// Keep the payload bytes of selected channels, in arrival order.
pub fn select_channels<S>(chunks: S, selection: ChannelSelection) -> LogByteStream
where
    S: Stream<Item = Result<Chunk, LogError>> + Send + 'static,
{
    Box::pin(chunks.try_filter_map(move |chunk| {
        let keep = selection.includes(chunk.channel) && !chunk.payload.is_empty();
        future::ready(Ok(keep.then_some(chunk.payload)))
    }))
}

/// Demultiplex a raw engine stream and keep the selected channels.
pub fn demux<R>(reader: R, tty: bool, selection: ChannelSelection) -> LogByteStream
where
    R: AsyncRead + Send + 'static,
{
    let chunks = FramedRead::new(reader, FrameCodec::new(tty)).map_err(LogError::from);
    select_channels(chunks, selection)
}

/// Decode persisted NDJSON records and keep the selected channels.
pub fn replay<R>(reader: R, selection: ChannelSelection) -> LogByteStream
where
    R: AsyncRead + Send + 'static,
{
    let chunks = FramedRead::new(reader, RecordCodec::new())
        .map_ok(LogRecord::into_chunk)
        .map_err(LogError::from);
    select_channels(chunks, selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    fn frame(channel: Channel, payload: &str) -> Vec<u8> {
        let selector = match channel {
            Channel::Stdout => 1u8,
            Channel::Stderr => 2u8,
        };
        let mut buf = vec![selector, 0, 0, 0];
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload.as_bytes());
        buf
    }

    fn frames(items: &[(Channel, &str)]) -> Vec<u8> {
        items.iter().flat_map(|(c, p)| frame(*c, p)).collect()
    }

    async fn collect(stream: LogByteStream) -> Result<Vec<u8>, LogError> {
        stream
            .try_fold(Vec::new(), |mut acc, bytes| async move {
                acc.extend_from_slice(&bytes);
                Ok::<_, LogError>(acc)
            })
            .await
    }

    /// Keep only the bytes of `haystack` drawn from `alphabet`, in order.
    fn subsequence_of(haystack: &[u8], alphabet: &[u8]) -> Vec<u8> {
        haystack.iter().copied().filter(|b| alphabet.contains(b)).collect()
    }

    const SELECT_STDOUT: ChannelSelection = ChannelSelection { stdout: true, stderr: false };
    const SELECT_STDERR: ChannelSelection = ChannelSelection { stdout: false, stderr: true };

    #[tokio::test]
    async fn test_single_stdout_frame() {
        let raw = frame(Channel::Stdout, "hello");
        let out = collect(demux(std::io::Cursor::new(raw), false, SELECT_STDOUT)).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_both_channels_keep_per_channel_order() {
        let raw = frames(&[
            (Channel::Stdout, "out1"),
            (Channel::Stderr, "err1"),
            (Channel::Stdout, "out2"),
            (Channel::Stderr, "err2"),
        ]);
        let out = collect(demux(std::io::Cursor::new(raw), false, ChannelSelection::ALL)).await.unwrap();

        assert_eq!(out.len(), "out1out2err1err2".len());
        let text = String::from_utf8(out).unwrap();
        let stdout: String = text.match_indices("out").map(|(i, _)| &text[i..i + 4]).collect();
        let stderr: String = text.match_indices("err").map(|(i, _)| &text[i..i + 4]).collect();
        assert_eq!(stdout, "out1out2");
        assert_eq!(stderr, "err1err2");
    }

    #[tokio::test]
    async fn test_single_channel_selection_skips_other_payloads() {
        let raw = frames(&[
            (Channel::Stdout, "a"),
            (Channel::Stderr, "XXXX"),
            (Channel::Stdout, ""),
            (Channel::Stdout, "b"),
            (Channel::Stderr, ""),
            (Channel::Stderr, "YY"),
            (Channel::Stdout, "c"),
        ]);

        let out = collect(demux(std::io::Cursor::new(raw.clone()), false, SELECT_STDOUT)).await.unwrap();
        assert_eq!(out, b"abc");

        let out = collect(demux(std::io::Cursor::new(raw), false, SELECT_STDERR)).await.unwrap();
        assert_eq!(out, b"XXXXYY");
    }

    #[tokio::test]
    async fn test_frame_boundaries_do_not_matter() {
        // Disjoint alphabets per channel let each channel's bytes be recovered
        // from the combined output without assuming an interleaving.
        let payloads = [
            (Channel::Stdout, "first line\n"),
            (Channel::Stderr, "12"),
            (Channel::Stdout, ""),
            (Channel::Stderr, "345"),
            (Channel::Stdout, "x"),
            (Channel::Stderr, ""),
            (Channel::Stdout, "second line\n"),
        ];
        let raw = frames(&payloads);
        let expected = |channel: Channel| -> Vec<u8> {
            payloads
                .iter()
                .filter(|(c, _)| *c == channel)
                .flat_map(|(_, p)| p.bytes())
                .collect()
        };

        for read_size in [1usize, 2, 3, 5, 7, 8, 9, 13, raw.len()] {
            let mut builder = tokio_test::io::Builder::new();
            for piece in raw.chunks(read_size) {
                builder.read(piece);
            }
            let out = collect(demux(builder.build(), false, ChannelSelection::ALL)).await.unwrap();

            let total: usize = payloads.iter().map(|(_, p)| p.len()).sum();
            assert_eq!(out.len(), total, "read size {}", read_size);
            let stdout: Vec<u8> = out.iter().copied().filter(|b| !b.is_ascii_digit()).collect();
            assert_eq!(stdout, expected(Channel::Stdout));
            assert_eq!(subsequence_of(&out, b"0123456789"), expected(Channel::Stderr));
        }
    }

    #[tokio::test]
    async fn test_tty_stream_is_stdout_only() {
        let raw = b"\x02\x00\x00\x00plain tty output\n".to_vec();

        let out = collect(demux(std::io::Cursor::new(raw.clone()), true, SELECT_STDOUT)).await.unwrap();
        assert_eq!(out, raw);

        let out = collect(demux(std::io::Cursor::new(raw), true, SELECT_STDERR)).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_header_fails_stream() {
        let mut raw = frame(Channel::Stdout, "ok");
        raw.extend_from_slice(&[1, 0, 0, 0, 0]);
        let err = collect(demux(std::io::Cursor::new(raw), false, ChannelSelection::ALL)).await.unwrap_err();
        assert!(matches!(err, LogError::Frame(FrameError::TruncatedHeader { available: 5 })));
    }

    #[tokio::test]
    async fn test_replay_filters_records() {
        let stored = concat!(
            "{\"channel\":\"stdout\",\"text\":\"a\\n\"}\n",
            "{\"channel\":\"stderr\",\"text\":\"b\\n\"}\n",
        );
        let out = collect(replay(std::io::Cursor::new(stored.as_bytes().to_vec()), SELECT_STDOUT)).await.unwrap();
        assert_eq!(out, b"a\n");

        let out = collect(replay(std::io::Cursor::new(stored.as_bytes().to_vec()), ChannelSelection::ALL)).await.unwrap();
        assert_eq!(out, b"a\nb\n");
    }

    #[tokio::test]
    async fn test_replay_malformed_record_fails() {
        let stored = "{\"channel\":\"stdout\",\"text\":\"a\\n\"}\nnot json\n";
        let err = collect(replay(std::io::Cursor::new(stored.as_bytes().to_vec()), ChannelSelection::ALL)).await.unwrap_err();
        assert!(matches!(err, LogError::Record(_)));
    }

    struct DropCounter {
        inner: std::io::Cursor<Vec<u8>>,
        drops: Arc<AtomicUsize>,
    }

    impl AsyncRead for DropCounter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_source_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let reader = DropCounter {
            inner: std::io::Cursor::new(frames(&[(Channel::Stdout, "a"), (Channel::Stdout, "b")])),
            drops: Arc::clone(&drops),
        };

        let mut stream = demux(reader, false, ChannelSelection::ALL);
        let first = futures_util::StreamExt::next(&mut stream).await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"a"));
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(stream);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_selection_helpers() {
        assert!(ChannelSelection::NONE.is_empty());
        assert!(!ChannelSelection::ALL.is_empty());
        assert!(SELECT_STDOUT.includes(Channel::Stdout));
        assert!(!SELECT_STDOUT.includes(Channel::Stderr));
    }
}

//! Line splitting: per-channel buffers that turn raw chunks into records.

use bytes::BytesMut;
use chrono::{DateTime, Utc};

use super::LogRecord;
use crate::model::Channel;

/// Splits a leading RFC 3339 timestamp token off a line.
///
/// The token must be followed by a single space; lines without a
/// parseable prefix are returned untouched.
pub fn split_timestamp(line: &[u8]) -> (Option<DateTime<Utc>>, &[u8]) {
    let Some(space) = line.iter().position(|b| *b == b' ') else {
        return (None, line);
    };
    if space == 0 {
        return (None, line);
    }

    let parsed = std::str::from_utf8(&line[..space])
        .ok()
        .and_then(|token| DateTime::parse_from_rfc3339(token).ok());

    match parsed {
        Some(ts) => (Some(ts.with_timezone(&Utc)), &line[space + 1..]),
        None => (None, line),
    }
}

/// Accumulates bytes for one channel and cuts them into line records.
#[derive(Debug)]
pub struct LineEncoder {
    channel: Channel,
    buf: BytesMut,
    // Bytes of `buf` already known to hold no newline.
    scanned: usize,
}

impl LineEncoder {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            buf: BytesMut::new(),
            scanned: 0,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Feeds bytes and returns every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<LogRecord> {
        self.buf.extend_from_slice(bytes);

        let mut records = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(self.scanned + offset + 1);
            self.scanned = 0;
            records.push(self.record(&line));
        }
        self.scanned = self.buf.len();
        records
    }

    /// Flushes a trailing line that never saw its newline.
    pub fn finish(&mut self) -> Option<LogRecord> {
        if self.buf.is_empty() {
            return None;
        }
        let line = self.buf.split();
        self.scanned = 0;
        Some(self.record(&line))
    }

    fn record(&self, line: &[u8]) -> LogRecord {
        let (timestamp, text) = split_timestamp(line);
        LogRecord {
            timestamp,
            channel: self.channel,
            text: String::from_utf8_lossy(text).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_split_timestamp() {
        let (ts, rest) = split_timestamp(b"2024-01-01T12:00:00.5Z hello\n");
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
            + chrono::Duration::milliseconds(500);
        assert_eq!(ts, Some(expected));
        assert_eq!(rest, b"hello\n");
    }

    #[test]
    fn test_split_timestamp_normalizes_offset() {
        let (ts, rest) = split_timestamp(b"2024-01-01T14:00:00+02:00 x");
        assert_eq!(ts, Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()));
        assert_eq!(rest, b"x");
    }

    #[test]
    fn test_split_timestamp_leaves_plain_lines_alone() {
        for line in [&b"hello world\n"[..], b" leading space", b"nospace", b""] {
            let (ts, rest) = split_timestamp(line);
            assert!(ts.is_none());
            assert_eq!(rest, line);
        }
    }

    #[test]
    fn test_push_emits_complete_lines_only() {
        let mut enc = LineEncoder::new(Channel::Stdout);
        assert!(enc.push(b"hel").is_empty());

        let records = enc.push(b"lo\nwor");
        assert_eq!(records, vec![LogRecord::new(Channel::Stdout, "hello\n")]);

        let records = enc.push(b"ld\n\nx");
        assert_eq!(
            records,
            vec![
                LogRecord::new(Channel::Stdout, "world\n"),
                LogRecord::new(Channel::Stdout, "\n"),
            ]
        );

        assert_eq!(enc.finish(), Some(LogRecord::new(Channel::Stdout, "x")));
        assert_eq!(enc.finish(), None);
    }

    #[test]
    fn test_timestamp_is_split_per_line() {
        let mut enc = LineEncoder::new(Channel::Stderr);
        let records = enc.push(b"2024-01-01T00:00:00Z a\n2024-01-01T00:00:01Z b\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "a\n");
        assert_eq!(records[1].text, "b\n");
        assert_eq!(
            records[1].timestamp,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap())
        );
        assert!(records.iter().all(|r| r.channel == Channel::Stderr));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut enc = LineEncoder::new(Channel::Stdout);
        let records = enc.push(b"bad \xff byte\n");
        assert_eq!(records[0].text, "bad \u{fffd} byte\n");
    }

    #[test]
    fn test_long_unterminated_line_in_many_pieces() {
        let mut enc = LineEncoder::new(Channel::Stdout);
        let piece = [b'#'; 4096];
        for _ in 0..2000 {
            assert!(enc.push(&piece).is_empty());
        }
        assert_eq!(enc.scanned, 2000 * 4096);

        let records = enc.push(b"\rdone\nnext");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text.len(), 2000 * 4096 + "\rdone\n".len());
        assert!(records[0].text.ends_with("\rdone\n"));
        assert_eq!(enc.scanned, "next".len());

        assert_eq!(enc.push(b" line\n"), vec![LogRecord::new(Channel::Stdout, "next line\n")]);
        assert_eq!(enc.scanned, 0);
        assert!(enc.finish().is_none());
    }

    #[test]
    fn test_finish_on_empty_buffer() {
        let mut enc = LineEncoder::new(Channel::Stdout);
        assert!(enc.finish().is_none());
    }
}

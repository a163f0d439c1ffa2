//! Codec: NDJSON encoding of log records, one JSON object per line.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::model::Channel;
use crate::protocol::Chunk;

/// A single captured log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Time the engine received the line, when the source carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub channel: Channel,
    /// Line content including its trailing newline, if it had one.
    pub text: String,
}

impl LogRecord {
    pub fn new(channel: Channel, text: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            channel,
            text: text.into(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn into_chunk(self) -> Chunk {
        Chunk::new(self.channel, Bytes::from(self.text))
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed log record: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode log record: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Line-delimited JSON codec for [`LogRecord`]s.
///
/// Blank lines are skipped; a final record without a trailing newline is
/// still decoded at end of input.
#[derive(Debug, Default)]
pub struct RecordCodec {
    // Bytes already scanned for a newline in the current buffer.
    next_index: usize,
}

impl RecordCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(line: &[u8]) -> Result<Option<LogRecord>, CodecError> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(line)
            .map(Some)
            .map_err(CodecError::Malformed)
    }
}

impl Decoder for RecordCodec {
    type Item = LogRecord;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LogRecord>, CodecError> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                self.next_index = src.len();
                return Ok(None);
            };

            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;
            if let Some(record) = Self::parse(&line)? {
                return Ok(Some(record));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<LogRecord>, CodecError> {
        if let Some(record) = self.decode(src)? {
            return Ok(Some(record));
        }
        let rest = src.split();
        self.next_index = 0;
        Self::parse(&rest)
    }
}

impl Encoder<LogRecord> for RecordCodec {
    type Error = CodecError;

    fn encode(&mut self, record: LogRecord, dst: &mut BytesMut) -> Result<(), CodecError> {
        <Self as Encoder<&LogRecord>>::encode(self, &record, dst)
    }
}

impl Encoder<&LogRecord> for RecordCodec {
    type Error = CodecError;

    fn encode(&mut self, record: &LogRecord, dst: &mut BytesMut) -> Result<(), CodecError> {
        let mut writer = dst.writer();
        serde_json::to_writer(&mut writer, record).map_err(CodecError::Encode)?;
        writer.into_inner().put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encode(records: &[LogRecord]) -> BytesMut {
        let mut codec = RecordCodec::new();
        let mut buf = BytesMut::new();
        for record in records {
            codec.encode(record, &mut buf).unwrap();
        }
        buf
    }

    fn decode(buf: &mut BytesMut) -> Result<Vec<LogRecord>, CodecError> {
        let mut codec = RecordCodec::new();
        let mut out = Vec::new();
        while let Some(record) = codec.decode(buf)? {
            out.push(record);
        }
        while let Some(record) = codec.decode_eof(buf)? {
            out.push(record);
        }
        Ok(out)
    }

    #[test]
    fn test_encoded_record_is_one_json_line() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let buf = encode(&[LogRecord::new(Channel::Stderr, "boom\n").with_timestamp(ts)]);

        let text = std::str::from_utf8(&buf).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1, "embedded newline must be escaped");

        let json: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(json["channel"], "stderr");
        assert_eq!(json["text"], "boom\n");
        assert_eq!(json["timestamp"], "2024-01-01T12:00:00Z");
    }

    #[test]
    fn test_missing_timestamp_is_omitted() {
        let buf = encode(&[LogRecord::new(Channel::Stdout, "a")]);
        let json: serde_json::Value = serde_json::from_slice(&buf[..buf.len() - 1]).unwrap();
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn test_round_trip_preserves_channel_text_and_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 8, 30, 15).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let records = vec![
            LogRecord::new(Channel::Stdout, "with ts\n").with_timestamp(ts),
            LogRecord::new(Channel::Stderr, "no ts, partial"),
            LogRecord::new(Channel::Stdout, "unicode: h\u{e9}llo \u{1f600}\n"),
        ];
        let mut buf = encode(&records);
        assert_eq!(decode(&mut buf).unwrap(), records);
    }

    #[test]
    fn test_decode_skips_blank_lines_and_reads_unterminated_tail() {
        let mut buf = BytesMut::from(
            "\n{\"channel\":\"stdout\",\"text\":\"a\\n\"}\n  \n{\"channel\":\"stderr\",\"text\":\"b\"}",
        );
        let records = decode(&mut buf).unwrap();
        assert_eq!(
            records,
            vec![
                LogRecord::new(Channel::Stdout, "a\n"),
                LogRecord::new(Channel::Stderr, "b"),
            ]
        );
    }

    #[test]
    fn test_decode_waits_for_complete_line() {
        let mut codec = RecordCodec::new();
        let mut buf = BytesMut::from("{\"channel\":\"stdout\",");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\"text\":\"x\"}\n");
        let record = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(record, LogRecord::new(Channel::Stdout, "x"));
    }

    #[test]
    fn test_malformed_record_is_error() {
        let mut buf = BytesMut::from("{\"channel\":\"stdin\",\"text\":\"x\"}\n");
        assert!(matches!(decode(&mut buf), Err(CodecError::Malformed(_))));

        let mut buf = BytesMut::from("{\"channel\":\"stdout\"");
        assert!(matches!(decode(&mut buf), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_into_chunk_keeps_channel_and_text() {
        let chunk = LogRecord::new(Channel::Stderr, "e\n").into_chunk();
        assert_eq!(chunk.channel, Channel::Stderr);
        assert_eq!(chunk.payload, Bytes::from_static(b"e\n"));
    }
}

//! Incremental decoder for the agent backend's event stream.
//!
//! Wire format per record: zero or more `id: <v>`, `event: <v>` and
//! `data: <json>` lines closed by a blank line. The payload `[DONE]` ends the
//! stream. Bytes are buffered until a full line is available, so chunk
//! boundaries (including ones inside a multi-byte character) do not matter.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;

use crate::error::StreamError;

/// In-band payload marking graceful end of stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Boxed chunk source, as handed over by an HTTP body or a test fixture.
pub type ByteChunks = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// One decoded record. Only built once a record carried a parsable payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SseRecord {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Record(SseRecord),
    Done,
}

/// Line-oriented codec. Field state accumulates until a blank line.
#[derive(Debug, Default)]
pub struct SseCodec {
    event: Option<String>,
    id: Option<String>,
    data: Option<serde_json::Value>,
    finished: bool,
}

impl SseCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.event = None;
        self.id = None;
        self.data = None;
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            let data = self.data.take();
            let event = self.event.take();
            let id = self.id.take();
            return data.map(|data| SseFrame::Record(SseRecord { event, id, data }));
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(i) => {
                let value = &line[i + 1..];
                (&line[..i], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => {
                if value.trim() == DONE_SENTINEL {
                    self.finished = true;
                    self.reset();
                    return Some(SseFrame::Done);
                }
                match serde_json::from_str::<serde_json::Value>(value) {
                    Ok(v) => self.data = Some(v),
                    Err(e) => {
                        tracing::warn!(error = %e, payload = %value, "Dropping malformed stream data line");
                    }
                }
            }
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            other => tracing::trace!(field = other, "Ignoring unknown stream field"),
        }
        None
    }
}

impl Decoder for SseCodec {
    type Item = SseFrame;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SseFrame>, StreamError> {
        if self.finished {
            src.clear();
            return Ok(None);
        }

        while let Some(pos) = src.iter().position(|b| *b == b'\n') {
            let raw = src.split_to(pos + 1);
            let mut end = pos;
            if end > 0 && raw[end - 1] == b'\r' {
                end -= 1;
            }
            let line = String::from_utf8_lossy(&raw[..end]);
            if let Some(frame) = self.process_line(&line) {
                return Ok(Some(frame));
            }
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<SseFrame>, StreamError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // An unterminated last line still counts; only `[DONE]` can complete here.
        if !src.is_empty() && !self.finished {
            let raw = src.split();
            let line = raw.strip_suffix(b"\r").unwrap_or(&raw[..]);
            let line = String::from_utf8_lossy(line);
            if let Some(SseFrame::Done) = self.process_line(&line) {
                return Ok(Some(SseFrame::Done));
            }
        }
        if !src.is_empty() || self.data.is_some() {
            tracing::debug!(
                trailing_bytes = src.len(),
                "Stream closed mid-record, discarding unterminated data"
            );
            src.clear();
        }
        self.reset();
        Ok(None)
    }
}

/// Lazy sequence of records over a transport.
///
/// Ends on the `[DONE]` sentinel, on transport EOF, or after yielding a
/// single transport error. The transport is dropped as soon as the sequence
/// ends, and dropping the stream early aborts the transport.
pub struct SseStream<R = StreamReader<ByteChunks, Bytes>> {
    inner: Option<FramedRead<R, SseCodec>>,
    saw_sentinel: bool,
}

impl SseStream {
    /// Decode an unbounded sequence of byte chunks.
    pub fn from_chunks<S>(chunks: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let boxed: ByteChunks = Box::pin(chunks);
        Self::from_reader(StreamReader::new(boxed))
    }
}

impl<R: AsyncRead + Unpin> SseStream<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            inner: Some(FramedRead::new(reader, SseCodec::new())),
            saw_sentinel: false,
        }
    }

    /// True once the stream ended because the backend sent `[DONE]`.
    pub fn saw_sentinel(&self) -> bool {
        self.saw_sentinel
    }

    /// True once no further items will be produced.
    pub fn is_finished(&self) -> bool {
        self.inner.is_none()
    }
}

impl<R: AsyncRead + Unpin> Stream for SseStream<R> {
    type Item = Result<SseRecord, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match ready!(inner.poll_next_unpin(cx)) {
            Some(Ok(SseFrame::Record(record))) => Poll::Ready(Some(Ok(record))),
            Some(Ok(SseFrame::Done)) => {
                tracing::debug!("Stream sentinel received");
                self.saw_sentinel = true;
                self.inner = None;
                Poll::Ready(None)
            }
            Some(Err(e)) => {
                self.inner = None;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                self.inner = None;
                Poll::Ready(None)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunked(chunks: Vec<Vec<u8>>) -> SseStream {
        SseStream::from_chunks(futures::stream::iter(
            chunks.into_iter().map(|c| Ok::<_, io::Error>(Bytes::from(c))),
        ))
    }

    async fn collect_data(stream: SseStream) -> Vec<serde_json::Value> {
        stream
            .map(|item| item.expect("no transport errors expected").data)
            .collect()
            .await
    }

    const TWO_RECORDS: &str = "data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n";

    // ========================================================================
    // TEST 1: Records decode in order from one chunk
    // ========================================================================
    #[tokio::test]
    async fn test_single_chunk_yields_records_in_order() {
        let data = collect_data(chunked(vec![TWO_RECORDS.as_bytes().to_vec()])).await;
        assert_eq!(data, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    // ========================================================================
    // TEST 2: Chunk boundaries do not change the records
    // ========================================================================
    #[tokio::test]
    async fn test_any_two_way_split_yields_same_records() {
        let bytes = TWO_RECORDS.as_bytes();
        for split in 0..=bytes.len() {
            let data = collect_data(chunked(vec![
                bytes[..split].to_vec(),
                bytes[split..].to_vec(),
            ]))
            .await;
            assert_eq!(
                data,
                vec![json!({"a": 1}), json!({"b": 2})],
                "split at byte {split}"
            );
        }
    }

    // ========================================================================
    // TEST 3: One byte per chunk
    // ========================================================================
    #[tokio::test]
    async fn test_byte_at_a_time_yields_same_records() {
        let chunks = TWO_RECORDS.bytes().map(|b| vec![b]).collect();
        let data = collect_data(chunked(chunks)).await;
        assert_eq!(data, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    // ========================================================================
    // TEST 4: Malformed data is skipped
    // ========================================================================
    #[tokio::test]
    async fn test_malformed_data_is_skipped_and_stream_continues() {
        let body = "data: {not valid}\n\ndata: {\"ok\":true}\n\ndata: [DONE]\n\n";
        let data = collect_data(chunked(vec![body.as_bytes().to_vec()])).await;
        assert_eq!(data, vec![json!({"ok": true})]);
    }

    // ========================================================================
    // TEST 5: A record without data is dropped with its fields
    // ========================================================================
    #[tokio::test]
    async fn test_record_without_data_is_discarded() {
        let body = "event: ping\nid: 7\n\nevent: message\ndata: {\"x\":1}\n\n";
        let records: Vec<SseRecord> = chunked(vec![body.as_bytes().to_vec()])
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(records.len(), 1);
        // fields of the discarded record must not leak into the next one
        assert_eq!(records[0].event.as_deref(), Some("message"));
        assert_eq!(records[0].id, None);
    }

    // ========================================================================
    // TEST 6: event and id fields are carried
    // ========================================================================
    #[tokio::test]
    async fn test_event_and_id_fields_are_carried() {
        let body = "id: 42\nevent: tool_call\ndata: {\"name\":\"search\"}\n\n";
        let records: Vec<SseRecord> = chunked(vec![body.as_bytes().to_vec()])
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            records,
            vec![SseRecord {
                event: Some("tool_call".to_string()),
                id: Some("42".to_string()),
                data: json!({"name": "search"}),
            }]
        );
    }

    // ========================================================================
    // TEST 7: [DONE] drops the partial record and ends the stream
    // ========================================================================
    #[tokio::test]
    async fn test_sentinel_discards_partial_record_and_stops() {
        let body = "data: {\"a\":1}\n\ndata: {\"partial\":true}\ndata: [DONE]\n\ndata: {\"late\":1}\n\n";
        let mut stream = chunked(vec![body.as_bytes().to_vec()]);
        let mut data = Vec::new();
        while let Some(item) = stream.next().await {
            data.push(item.unwrap().data);
        }
        assert_eq!(data, vec![json!({"a": 1})]);
        assert!(stream.saw_sentinel());
        assert!(stream.is_finished());
    }

    // ========================================================================
    // TEST 8: Nothing is read after [DONE]
    // ========================================================================
    #[tokio::test]
    async fn test_sentinel_stops_before_reading_further_chunks() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n\ndata: [DONE]\n\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "must not be read")),
        ];
        let stream = SseStream::from_chunks(futures::stream::iter(chunks));
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }

    // ========================================================================
    // TEST 9: EOF without [DONE] ends cleanly
    // ========================================================================
    #[tokio::test]
    async fn test_eof_without_sentinel_ends_cleanly() {
        let body = "data: {\"a\":1}\n\ndata: {\"unterminated\":true}\n";
        let mut stream = chunked(vec![body.as_bytes().to_vec()]);
        let mut data = Vec::new();
        while let Some(item) = stream.next().await {
            data.push(item.unwrap().data);
        }
        assert_eq!(data, vec![json!({"a": 1})]);
        assert!(!stream.saw_sentinel());
    }

    // ========================================================================
    // TEST 10: [DONE] without a trailing newline still ends the stream
    // ========================================================================
    #[tokio::test]
    async fn test_unterminated_sentinel_at_eof_is_honored() {
        for body in [
            "data: {\"a\":1}\n\ndata: [DONE]",
            "data: {\"a\":1}\r\n\r\ndata: [DONE]\r",
        ] {
            let mut stream = chunked(vec![body.as_bytes().to_vec()]);
            let mut data = Vec::new();
            while let Some(item) = stream.next().await {
                data.push(item.unwrap().data);
            }
            assert_eq!(data, vec![json!({"a": 1})], "body {body:?}");
            assert!(stream.saw_sentinel(), "body {body:?}");
        }
    }

    // ========================================================================
    // TEST 11: An unterminated data line at EOF yields nothing
    // ========================================================================
    #[test]
    fn test_unterminated_data_line_at_eof_is_dropped() {
        let mut codec = SseCodec::new();
        let mut buf = BytesMut::from(&b"data: {\"a\":1}"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    // ========================================================================
    // TEST 12: CRLF line endings
    // ========================================================================
    #[tokio::test]
    async fn test_crlf_line_endings() {
        let body = "event: message\r\ndata: {\"a\":1}\r\n\r\ndata: [DONE]\r\n\r\n";
        let records: Vec<SseRecord> = chunked(vec![body.as_bytes().to_vec()])
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.as_deref(), Some("message"));
    }

    // ========================================================================
    // TEST 13: UTF-8 character split across chunks
    // ========================================================================
    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let body = "data: {\"text\":\"héllo ✓\"}\n\n".as_bytes().to_vec();
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let data = collect_data(chunked(vec![body[..split].to_vec(), body[split..].to_vec()])).await;
        assert_eq!(data, vec![json!({"text": "héllo ✓"})]);
    }

    // ========================================================================
    // TEST 14: Comments and unknown fields are ignored
    // ========================================================================
    #[tokio::test]
    async fn test_comments_and_unknown_fields_ignored() {
        let body = ": keep-alive\nretry: 1000\ndata: {\"a\":1}\n\n";
        let data = collect_data(chunked(vec![body.as_bytes().to_vec()])).await;
        assert_eq!(data, vec![json!({"a": 1})]);
    }

    // ========================================================================
    // TEST 15: Transport error is yielded once
    // ========================================================================
    #[tokio::test]
    async fn test_transport_error_is_yielded_once_then_ends() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
            Ok(Bytes::from_static(b"data: {\"b\":2}\n\n")),
        ];
        let items: Vec<_> = SseStream::from_chunks(futures::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(StreamError::Transport(_))));
    }

    // ========================================================================
    // TEST 16: Codec buffers a partial line
    // ========================================================================
    #[test]
    fn test_codec_keeps_partial_line_buffered() {
        let mut codec = SseCodec::new();
        let mut buf = BytesMut::from(&b"data: {\"a\""[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"data: {\"a\"");

        buf.extend_from_slice(b":1}\n\n");
        let frame = codec.decode(&mut buf).unwrap();
        assert!(matches!(frame, Some(SseFrame::Record(_))));
        assert!(buf.is_empty());
    }

    // ========================================================================
    // TEST 17: data: without the optional space
    // ========================================================================
    #[test]
    fn test_data_without_space_after_colon() {
        let mut codec = SseCodec::new();
        let mut buf = BytesMut::from(&b"data:{\"a\":1}\n\n"[..]);
        match codec.decode(&mut buf).unwrap() {
            Some(SseFrame::Record(r)) => assert_eq!(r.data, json!({"a": 1})),
            other => panic!("expected record, got {other:?}"),
        }
    }
}

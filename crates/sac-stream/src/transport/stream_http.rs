//! Streaming-HTTP transport: a long-lived GET whose chunked body carries
//! `data:`-prefixed records separated by blank lines.
//!
//! Chunk boundaries are arbitrary, so the splitter buffers bytes and
//! only yields complete records. This transport is receive-only.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use memchr::memchr2;
use tracing::debug;

use crate::{
    endpoint::Endpoint,
    error::{StreamError, StreamResult},
    frame::Frame,
    transport::{StreamTransport, TransportConn},
};

/// Connects streaming HTTP endpoints (`http://` / `https://`).
#[derive(Clone, Debug, Default)]
pub struct HttpStreamTransport {
    client: reqwest::Client,
}

impl HttpStreamTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Use a caller-supplied client (custom TLS, proxies, timeouts).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn open(&self, endpoint: &Endpoint) -> StreamResult<Box<dyn TransportConn>> {
        let mut request = self
            .client
            .get(endpoint.request_url())
            .header("accept", "text/event-stream");
        if let Some((name, value)) = endpoint.auth_header() {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StreamError::connect(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::invalid_status(status.as_u16()));
        }
        debug!(status = %status, "Stream response established");

        Ok(Box::new(HttpStreamConn {
            body: Box::pin(response.bytes_stream()),
            splitter: RecordSplitter::new(),
        }))
    }
}

struct HttpStreamConn {
    body: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    splitter: RecordSplitter,
}

#[async_trait]
impl TransportConn for HttpStreamConn {
    async fn next_frame(&mut self) -> Option<StreamResult<Frame>> {
        loop {
            if let Some(record) = self.splitter.next_record() {
                return Some(Ok(Frame::Text(record)));
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.splitter.push(&chunk),
                Some(Err(e)) => return Some(Err(StreamError::transport(e.to_string()))),
                // Body ended; an unterminated trailing record is dropped.
                None => return None,
            }
        }
    }

    async fn send(&mut self, _frame: &Frame) -> StreamResult<()> {
        Err(StreamError::transport(
            "Streaming HTTP transport is receive-only",
        ))
    }

    async fn close(&mut self) {}
}

/// Reassembles `data:` records from an arbitrarily chunked byte stream.
///
/// Records are separated by blank lines; multiple `data:` lines within
/// one record are joined with `\n`. Accepts LF, CRLF, and lone-CR line
/// endings. An incomplete line or record stays buffered until more
/// bytes arrive, so a record is delivered exactly once no matter where
/// chunk boundaries fall.
#[derive(Debug, Default)]
pub struct RecordSplitter {
    buffer: BytesMut,
    data_lines: Vec<String>,
}

impl RecordSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the wire.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete record, if one is fully buffered.
    pub fn next_record(&mut self) -> Option<String> {
        while let Some(line) = self.take_line() {
            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    return Some(self.data_lines.drain(..).collect::<Vec<_>>().join("\n"));
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data_lines
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // Comments (`:`-prefixed) and unknown fields are skipped.
        }
        None
    }

    /// Take one complete line off the buffer, without its terminator.
    fn take_line(&mut self) -> Option<String> {
        let pos = memchr2(b'\r', b'\n', &self.buffer)?;
        // A CR at the very end might be half of a CRLF; wait for the
        // next chunk to decide.
        if self.buffer[pos] == b'\r' && pos + 1 == self.buffer.len() {
            return None;
        }
        let line = self.buffer.split_to(pos);
        let ending = if self.buffer.starts_with(b"\r\n") { 2 } else { 1 };
        let _ = self.buffer.split_to(ending);
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(splitter: &mut RecordSplitter) -> Vec<String> {
        std::iter::from_fn(|| splitter.next_record()).collect()
    }

    #[test]
    fn test_single_record() {
        let mut s = RecordSplitter::new();
        s.push(b"data: {\"type\":\"sync\"}\n\n");
        assert_eq!(drain(&mut s), vec!["{\"type\":\"sync\"}"]);
        assert!(s.next_record().is_none());
    }

    #[test]
    fn test_record_split_across_chunks() {
        let mut s = RecordSplitter::new();
        s.push(b"data: {\"curr");
        assert!(s.next_record().is_none());
        s.push(b"ent\":2}\n");
        assert!(s.next_record().is_none());
        s.push(b"\ndata: {\"current\":3}\n\n");
        assert_eq!(drain(&mut s), vec!["{\"current\":2}", "{\"current\":3}"]);
    }

    #[test]
    fn test_delimiter_split_across_chunks() {
        let mut s = RecordSplitter::new();
        s.push(b"data: a\n");
        assert!(s.next_record().is_none());
        s.push(b"\n");
        assert_eq!(drain(&mut s), vec!["a"]);
    }

    #[test]
    fn test_crlf_endings() {
        let mut s = RecordSplitter::new();
        s.push(b"data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(drain(&mut s), vec!["one", "two"]);
    }

    #[test]
    fn test_cr_at_chunk_boundary() {
        let mut s = RecordSplitter::new();
        s.push(b"data: x\r");
        assert!(s.next_record().is_none());
        s.push(b"\n\r\n");
        assert_eq!(drain(&mut s), vec!["x"]);
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut s = RecordSplitter::new();
        s.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(drain(&mut s), vec!["line1\nline2"]);
    }

    #[test]
    fn test_comments_and_unknown_fields_skipped() {
        let mut s = RecordSplitter::new();
        s.push(b": keep-alive\nevent: progress\ndata: payload\nid: 7\n\n");
        assert_eq!(drain(&mut s), vec!["payload"]);
    }

    #[test]
    fn test_blank_lines_without_data_yield_nothing() {
        let mut s = RecordSplitter::new();
        s.push(b"\n\n\n: ping\n\n");
        assert!(s.next_record().is_none());
    }

    #[test]
    fn test_data_without_space() {
        let mut s = RecordSplitter::new();
        s.push(b"data:tight\n\n");
        assert_eq!(drain(&mut s), vec!["tight"]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut s = RecordSplitter::new();
        let mut out = Vec::new();
        for b in b"data: slow\n\ndata: drip\n\n" {
            s.push(&[*b]);
            out.extend(drain(&mut s));
        }
        assert_eq!(out, vec!["slow", "drip"]);
    }
}

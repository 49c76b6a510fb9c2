// SSE framing: line reader and `data:` line decoder shared by every provider.

use futures::StreamExt;
use llm_conduit_types::{BoxStream, ByteStream, Error};
use serde_json::Value;

/// Splits a chunked byte stream into complete lines.
///
/// Lines may span any number of chunks, and a multi-byte UTF-8 sequence may be
/// split across chunks: bytes are buffered until a `\n` arrives, so decoding
/// only ever sees whole lines. A trailing `\r` is stripped.
#[derive(Debug, Default)]
pub struct LineReader {
    buffer: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line_bytes(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Flush a final unterminated line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = decode_line_bytes(&self.buffer);
        self.buffer.clear();
        Some(line)
    }
}

fn decode_line_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Decode one line. `Ok(None)` means skip: blank lines, non-`data:` fields,
/// comments and the `[DONE]` / `DONE` sentinels (any case).
pub fn decode_line(provider: &str, line: &str) -> Result<Option<Value>, Error> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() || is_done_sentinel(payload) {
        return Ok(None);
    }
    serde_json::from_str(payload)
        .map(Some)
        .map_err(|e| Error::decode(provider, line, e))
}

fn is_done_sentinel(payload: &str) -> bool {
    payload.eq_ignore_ascii_case("[done]") || payload.eq_ignore_ascii_case("done")
}

/// Lazily turn a response body into decoded JSON payloads.
///
/// The first decode error is yielded and ends the sequence; the body is
/// dropped with the stream, closing the connection.
pub fn decode_stream(provider: String, mut body: ByteStream) -> BoxStream<'static, Result<Value, Error>> {
    let stream = async_stream::stream! {
        let mut reader = LineReader::new();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for line in reader.feed(&chunk) {
                match decode_line(&provider, &line) {
                    Ok(Some(value)) => yield Ok(value),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
        if let Some(line) = reader.finish() {
            match decode_line(&provider, &line) {
                Ok(Some(value)) => yield Ok(value),
                Ok(None) => {}
                Err(e) => yield Err(e),
            }
        }
    };
    Box::pin(stream)
}

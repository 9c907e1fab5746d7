//! Server-sent event frame decoding for upstream responses.
//!
//! Raw chunks may split anywhere, including inside a UTF-8 sequence, so the
//! decoder buffers bytes and only decodes text once a frame is complete.
//! Frames whose data is not valid JSON are dropped: a single bad frame never
//! aborts the stream.

use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::debug;

/// One decoded `event:`/`data:` pair
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub data: Value,
}

/// Incremental SSE decoder; one instance per upstream response
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Last byte fed was a CR whose LF may arrive in the next chunk
    after_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk, returning every frame it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        // CR, CRLF and LF line endings all become LF
        for &byte in chunk {
            if std::mem::take(&mut self.after_cr) && byte == b'\n' {
                continue;
            }
            if byte == b'\r' {
                self.buffer.push(b'\n');
                self.after_cr = true;
            } else {
                self.buffer.push(byte);
            }
        }

        let mut frames = Vec::new();
        while let Some(end) = find_frame_end(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_frame(&raw[..end]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing frame that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        if self.buffer.iter().all(|b| *b == b'\n') {
            self.buffer.clear();
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        parse_frame(&raw)
    }

    /// Adapt a byte-chunk stream into a lazy stream of frames.
    ///
    /// Transport errors from the inner stream are passed through and end the
    /// frame stream.
    pub fn decode<S, B, E>(stream: S) -> impl Stream<Item = Result<SseFrame, E>>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
    {
        let state = DecodeState {
            inner: Box::pin(stream),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Some((Ok(frame), state));
                }
                if state.finished {
                    return None;
                }
                match state.inner.next().await {
                    Some(Ok(chunk)) => {
                        let frames = state.decoder.feed(chunk.as_ref());
                        state.pending.extend(frames);
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                    None => {
                        state.finished = true;
                        let trailing = state.decoder.finish();
                        state.pending.extend(trailing);
                    }
                }
            }
        })
    }
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
    finished: bool,
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn parse_frame(raw: &[u8]) -> Option<SseFrame> {
    let text = String::from_utf8_lossy(raw);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    let data = data_lines.join("\n");
    match serde_json::from_str(&data) {
        Ok(value) => Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: value,
        }),
        Err(e) => {
            debug!(error = %e, "Dropping SSE frame with malformed data");
            None
        }
    }
}

//! Server-Sent Events decoding
//!
//! The status stream uses the `text/event-stream` format:
//! ```text
//! event: test_updated\n
//! data: {"test": {...}}\n
//! \n
//! ```
//! A blank line dispatches the accumulated event. Multiple `data:` lines
//! are joined with `\n`. Comment lines start with `:`.

use std::collections::VecDeque;

use futures_util::stream::{self, Stream, StreamExt};

use super::types::StreamEvent;
use super::EventStream;
use crate::common::Error;

/// One dispatched SSE event before JSON decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental decoder fed with arbitrary byte chunks
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every event completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let mut line = String::from_utf8_lossy(&raw[..pos]).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing event left unterminated at end of stream
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            self.process_line(&line);
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry carry nothing the monitor uses
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

impl SseFrame {
    /// Decode the JSON payload; frames with non-JSON data are skipped
    pub fn into_event(self) -> Option<StreamEvent> {
        match serde_json::from_str(&self.data) {
            Ok(data) => Some(StreamEvent::new(self.event, data)),
            Err(e) => {
                tracing::trace!("Skipping non-JSON '{}' event: {}", self.event, e);
                None
            }
        }
    }
}

/// Turn a raw byte stream into decoded status events
///
/// A transport error is yielded once and ends the stream.
pub fn decode_event_stream<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    struct State<S> {
        body: std::pin::Pin<Box<S>>,
        decoder: SseDecoder,
        pending: VecDeque<StreamEvent>,
        done: bool,
    }

    let state = State {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let frames = st.decoder.feed(chunk.as_ref());
                    st.pending
                        .extend(frames.into_iter().filter_map(SseFrame::into_event));
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e.into()), st));
                }
                None => {
                    st.done = true;
                    st.pending
                        .extend(st.decoder.finish().and_then(SseFrame::into_event));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"event: test_updated\ndata: {\"a\":1}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "test_updated".into(),
                data: "{\"a\":1}".into()
            }]
        );
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: heart").is_empty());
        assert!(decoder.feed(b"beat\r\ndata: {}\r").is_empty());
        let frames = decoder.feed(b"\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "heartbeat");
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b": keepalive\ndata: line one\ndata: line two\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn test_event_without_data_is_not_dispatched() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"event: connection_ready\n\nevent: x\ndata: 1\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "x");
    }

    #[test]
    fn test_finish_flushes_pending() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: done\ndata: 42").is_empty());
        let frame = decoder.finish().unwrap();
        assert_eq!(frame.event, "done");
        assert_eq!(frame.data, "42");
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_decode_event_stream() {
        let chunks: Vec<std::result::Result<&'static [u8], Error>> = vec![
            Ok(&b"event: heartbeat\ndata: not-json\n\n"[..]),
            Ok(&b"event: test_updated\ndata: {\"test\":"[..]),
            Ok(&b"{\"id\":\"t1\"}}\n\n"[..]),
            Err(Error::Protocol("reset".into())),
            Ok(&b"event: never\ndata: {}\n\n"[..]),
        ];
        let events: Vec<_> = decode_event_stream(stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 2);
        let first = events[0].as_ref().unwrap();
        assert_eq!(first.event, "test_updated");
        assert_eq!(first.data["test"]["id"], "t1");
        assert!(matches!(events[1], Err(Error::Protocol(_))));
    }
}

//! Server-Sent Events line parsing and field accumulation, per the HTML
//! Living Standard's "event stream interpretation" (`spec.md` §4.7).

use crate::error::{Error, Result};

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `data` lines, newline-joined.
    pub data: String,
    /// The `event` field, defaulting to `"message"`.
    pub event: String,
    /// The current value of the last-event-ID buffer, if any field has set it.
    pub id: Option<String>,
    /// The reconnection time in milliseconds, if a `retry` field was seen.
    pub retry: Option<u64>,
}

/// Splits a byte stream into lines, tolerating `\n`, `\r\n`, and bare `\r`
/// line endings, buffering partial lines across chunk boundaries.
#[derive(Default)]
pub struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        LineReader::default()
    }

    /// Feeds newly-received bytes, returning every complete line found so
    /// far. Incomplete trailing data is buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < self.buf.len() {
            match self.buf[i] {
                b'\n' => {
                    let mut end = i;
                    if end > start && self.buf[end - 1] == b'\r' {
                        end -= 1;
                    }
                    lines.push(String::from_utf8_lossy(&self.buf[start..end]).into_owned());
                    start = i + 1;
                }
                b'\r' => {
                    if i + 1 == self.buf.len() {
                        // Might be the first half of a split `\r\n`; wait for more bytes.
                        break;
                    }
                    if self.buf[i + 1] != b'\n' {
                        lines.push(String::from_utf8_lossy(&self.buf[start..i]).into_owned());
                        start = i + 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        self.buf.drain(0..start);
        lines
    }
}

/// Accumulates `data`/`event`/`id`/`retry` fields across lines until a blank
/// line dispatches them (`spec.md` §4.7).
#[derive(Default)]
pub struct Accumulator {
    data: Vec<String>,
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl Accumulator {
    pub fn new() -> Self {
        Accumulator::default()
    }

    /// Processes one line, returning a dispatched event on a blank line, or
    /// `None` if the line merely updates accumulator state or the
    /// dispatched event was suppressed (empty `data` and no `event`/`id`/
    /// `retry` — `spec.md` §4.7). `data`/`event` reset on dispatch;
    /// `id`/`retry` persist, matching the living standard's "last event ID
    /// buffer" semantics.
    pub fn process_line(&mut self, line: &str) -> Result<Option<SseEvent>> {
        if line.is_empty() {
            let had_event_field = self.event.is_some();
            let event = self.dispatch();
            let suppressed =
                event.data.is_empty() && !had_event_field && event.id.is_none() && event.retry.is_none();
            return Ok(if suppressed { None } else { Some(event) });
        }
        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            "retry" => {
                let ms = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Error::sse_parsing(format!("malformed retry value: {value:?}")))?;
                self.retry = Some(ms);
            }
            _ => {}
        }
        Ok(None)
    }

    fn dispatch(&mut self) -> SseEvent {
        let data = self.data.join("\n");
        let event = SseEvent {
            data,
            event: self.event.clone().unwrap_or_else(|| "message".to_owned()),
            id: self.id.clone(),
            retry: self.retry,
        };
        self.data.clear();
        self.event = None;
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_reader_splits_on_lf_crlf_and_cr() {
        let mut reader = LineReader::new();
        let lines = reader.feed(b"a\nb\r\nc\rd");
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn line_reader_buffers_partial_final_line() {
        let mut reader = LineReader::new();
        assert!(reader.feed(b"abc").is_empty());
        let lines = reader.feed(b"def\n");
        assert_eq!(lines, vec!["abcdef"]);
    }

    #[test]
    fn line_reader_waits_out_a_split_crlf() {
        let mut reader = LineReader::new();
        assert!(reader.feed(b"line\r").is_empty());
        let lines = reader.feed(b"\nnext\n");
        assert_eq!(lines, vec!["line", "next"]);
    }

    #[test]
    fn multiple_data_lines_join_with_newline() {
        let mut acc = Accumulator::new();
        assert!(acc.process_line("data: first").unwrap().is_none());
        assert!(acc.process_line("data: second").unwrap().is_none());
        let event = acc.process_line("").unwrap().unwrap();
        assert_eq!(event.data, "first\nsecond");
        assert_eq!(event.event, "message");
    }

    #[test]
    fn id_and_retry_persist_across_dispatches() {
        let mut acc = Accumulator::new();
        acc.process_line("id: 7").unwrap();
        acc.process_line("retry: 500").unwrap();
        let first = acc.process_line("").unwrap().unwrap();
        assert_eq!(first.id.as_deref(), Some("7"));
        assert_eq!(first.retry, Some(500));

        acc.process_line("data: no new id here").unwrap();
        let second = acc.process_line("").unwrap().unwrap();
        assert_eq!(second.id.as_deref(), Some("7"));
        assert_eq!(second.retry, Some(500));
    }

    #[test]
    fn malformed_retry_is_a_parsing_error() {
        let mut acc = Accumulator::new();
        let err = acc.process_line("retry: notanumber").unwrap_err();
        assert!(err.is_sse());
    }

    #[test]
    fn comment_lines_are_ignored() {
        let mut acc = Accumulator::new();
        assert!(acc.process_line(": keep-alive ping").unwrap().is_none());
        assert!(acc.process_line("data: x").unwrap().is_none());
        let event = acc.process_line("").unwrap().unwrap();
        assert_eq!(event.data, "x");
    }

    #[test]
    fn empty_event_with_no_fields_is_suppressed() {
        let mut acc = Accumulator::new();
        assert!(acc.process_line("").unwrap().is_none());
    }

    #[test]
    fn unknown_fields_alone_do_not_produce_an_event() {
        let mut acc = Accumulator::new();
        acc.process_line("wat: ?").unwrap();
        assert!(acc.process_line("").unwrap().is_none());
    }
}

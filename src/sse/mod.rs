//! The Server-Sent Events engine: handshake, line parsing, dispatch/dedup,
//! and reconnection (`spec.md` §4.7).

pub mod parser;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use http::{HeaderName, HeaderValue};
use url::Url;

use crate::connect::Connector;
use crate::error::{Error, Result};
use crate::header::HeaderStore;
use crate::http1::{self, body::ByteStream};
use crate::request::{Method, Request};
use crate::timeout::Timeouts;

pub use parser::SseEvent;

/// Per-session SSE configuration (`spec.md` §6 `SSEOptions`).
#[derive(Debug, Clone)]
pub struct SseOptions {
    /// The HTTP method used to open the stream, default `GET` (`spec.md` §4.7).
    pub method: Method,
    /// Whether to transparently reopen the stream on EOF/transport error.
    pub reconnect: bool,
    /// Extra caller-supplied headers, merged with `Accept: text/event-stream`.
    pub headers: HeaderStore,
}

impl Default for SseOptions {
    fn default() -> Self {
        SseOptions {
            method: Method::Get,
            reconnect: true,
            headers: HeaderStore::new(),
        }
    }
}

/// An open (or reconnecting) SSE stream, exposed as a restartable sequence
/// of [`SseEvent`]s via [`SseSession::next_event`].
pub struct SseSession {
    connector: Arc<Connector>,
    url: Url,
    options: SseOptions,
    timeouts: Timeouts,
    user_agent: String,

    last_event_id: Option<String>,
    retry_delay: Duration,
    last_yielded_id: Option<String>,
    last_yielded_hash: Option<u64>,
    suppress_next_duplicate: bool,

    stream: Option<ByteStream>,
    line_reader: parser::LineReader,
    accumulator: parser::Accumulator,
}

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Opens an SSE stream, performing the initial handshake (`spec.md` §4.7).
pub async fn connect(
    connector: Arc<Connector>,
    url: Url,
    options: SseOptions,
    timeouts: Timeouts,
    user_agent: String,
) -> Result<SseSession> {
    let mut session = SseSession {
        connector,
        url,
        options,
        timeouts,
        user_agent,
        last_event_id: None,
        retry_delay: DEFAULT_RETRY_DELAY,
        last_yielded_id: None,
        last_yielded_hash: None,
        suppress_next_duplicate: false,
        stream: None,
        line_reader: parser::LineReader::new(),
        accumulator: parser::Accumulator::new(),
    };
    session.connect_once().await?;
    Ok(session)
}

impl SseSession {
    /// The last event ID observed, used on reconnect (`spec.md` §4.7).
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    async fn connect_once(&mut self) -> Result<()> {
        let mut request = Request::new(self.options.method, self.url.clone());
        request.headers_mut().merge(&self.options.headers);
        request
            .headers_mut()
            .insert(http::header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(id) = &self.last_event_id {
            request.headers_mut().insert(
                HeaderName::from_static("last-event-id"),
                HeaderValue::from_str(id).map_err(Error::builder)?,
            );
        }

        let exchange = http1::execute(&self.connector, request, &self.timeouts, &self.user_agent).await?;

        if !exchange.head.status.is_success() {
            return Err(Error::sse_connection(format!(
                "server responded with {} instead of a 2xx event-stream",
                exchange.head.status
            ))
            .with_url(self.url.clone()));
        }
        let content_type_ok = exchange
            .head
            .headers
            .get(&http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .eq_ignore_ascii_case("text/event-stream")
            })
            .unwrap_or(false);
        if !content_type_ok {
            return Err(Error::sse_connection("response Content-Type is not text/event-stream")
                .with_url(self.url.clone()));
        }

        self.stream = Some(exchange.body.into_stream());
        self.line_reader = parser::LineReader::new();
        self.accumulator = parser::Accumulator::new();
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        log::debug!("sse stream ended, reconnecting in {:?}", self.retry_delay);
        tokio::time::sleep(self.retry_delay).await;
        self.suppress_next_duplicate = self.last_yielded_hash.is_some();
        self.connect_once().await
    }

    /// Returns the next dispatched event, transparently reconnecting (per
    /// `options.reconnect`) when the stream ends. Returns `Ok(None)` only
    /// when the stream ended and reconnection is disabled.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>> {
        loop {
            if let Some(event) = self.drain_buffered_lines()? {
                return Ok(Some(event));
            }

            let stream = self.stream.as_mut().expect("connect_once always sets a stream");
            match stream.next().await {
                Some(Ok(chunk)) => {
                    let lines = self.line_reader.feed(&chunk);
                    if let Some(event) = self.process_lines(lines)? {
                        return Ok(Some(event));
                    }
                }
                Some(Err(e)) => {
                    self.stream = None;
                    if !self.options.reconnect {
                        return Err(Error::body(e));
                    }
                    self.reconnect().await?;
                }
                None => {
                    self.stream = None;
                    if !self.options.reconnect {
                        return Ok(None);
                    }
                    self.reconnect().await?;
                }
            }
        }
    }

    /// No buffered partial-line state carries an event by itself; reserved
    /// for symmetry with a future line-level (rather than chunk-level) read API.
    fn drain_buffered_lines(&mut self) -> Result<Option<SseEvent>> {
        Ok(None)
    }

    fn process_lines(&mut self, lines: Vec<String>) -> Result<Option<SseEvent>> {
        for line in lines {
            if let Some(event) = self.accumulator.process_line(&line)? {
                return Ok(self.accept_event(event));
            }
        }
        Ok(None)
    }

    fn accept_event(&mut self, event: SseEvent) -> Option<SseEvent> {
        if let Some(id) = &event.id {
            self.last_event_id = Some(id.clone());
        }
        if let Some(ms) = event.retry {
            self.retry_delay = Duration::from_millis(ms);
        }

        let hash = hash_event_data(&event.data);
        if self.suppress_next_duplicate {
            self.suppress_next_duplicate = false;
            let same_id = event.id.is_some() && event.id == self.last_yielded_id;
            let same_data = Some(hash) == self.last_yielded_hash;
            if same_id || same_data {
                return None;
            }
        }
        self.last_yielded_id = event.id.clone();
        self.last_yielded_hash = Some(hash);
        Some(event)
    }
}

fn hash_event_data(data: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str, id: Option<&str>) -> SseEvent {
        SseEvent {
            data: data.to_owned(),
            event: "message".to_owned(),
            id: id.map(str::to_owned),
            retry: None,
        }
    }

    fn bare_session() -> SseSession {
        SseSession {
            connector: Arc::new(Connector::new(
                crate::dns::GaiResolver::new(),
                crate::pool::PoolConfig::new(),
            )),
            url: Url::parse("http://example.com/events").unwrap(),
            options: SseOptions::default(),
            timeouts: Timeouts::none(),
            user_agent: "test".into(),
            last_event_id: None,
            retry_delay: DEFAULT_RETRY_DELAY,
            last_yielded_id: None,
            last_yielded_hash: None,
            suppress_next_duplicate: false,
            stream: None,
            line_reader: parser::LineReader::new(),
            accumulator: parser::Accumulator::new(),
        }
    }

    #[test]
    fn accept_event_tracks_last_event_id_and_retry() {
        let mut session = bare_session();
        let mut e = event("hello", Some("42"));
        e.retry = Some(1500);
        session.accept_event(e);
        assert_eq!(session.last_event_id(), Some("42"));
        assert_eq!(session.retry_delay, Duration::from_millis(1500));
    }

    #[test]
    fn reconnect_duplicate_of_last_yielded_is_dropped_once() {
        let mut session = bare_session();
        session.accept_event(event("same", Some("1")));
        session.suppress_next_duplicate = true;

        assert!(session.accept_event(event("same", Some("1"))).is_none());
        // suppression only applies to the first post-reconnect event
        assert!(session.accept_event(event("same", Some("1"))).is_some());
    }

    #[test]
    fn reconnect_duplicate_by_id_with_different_data_is_dropped_once() {
        let mut session = bare_session();
        session.accept_event(event("A", Some("E")));
        session.suppress_next_duplicate = true;

        // Same id as last yielded, regenerated payload: still a duplicate.
        assert!(session.accept_event(event("B", Some("E"))).is_none());
    }

    #[test]
    fn reconnect_non_duplicate_passes_through() {
        let mut session = bare_session();
        session.accept_event(event("first", Some("1")));
        session.suppress_next_duplicate = true;

        let next = session.accept_event(event("second", Some("2")));
        assert!(next.is_some());
        assert_eq!(session.last_event_id(), Some("2"));
    }
}

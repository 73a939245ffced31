//! A pooled connection (`spec.md` §3).

use std::time::Instant;

use crate::pool::origin::ConnectionKey;
use crate::stream::{BoxStream, PeekOutcome};

/// One duplex byte stream plus the bookkeeping a pool needs to decide
/// whether it may be reused.
///
/// Invariants (`spec.md` §3): a `Connection` is either idle in a pool,
/// leased by exactly one request, or closed; `requests_served` only ever
/// increases.
pub struct Connection {
    key: ConnectionKey,
    stream: BoxStream,
    created_at: Instant,
    last_used_at: Instant,
    requests_served: u64,
    keep_alive: bool,
    closed: bool,
}

impl Connection {
    /// Wraps a freshly opened stream as a brand new connection
    /// (`keep_alive=true`, `requests_served=0`, per `spec.md` §4.3).
    pub fn new(key: ConnectionKey, stream: BoxStream) -> Self {
        let now = Instant::now();
        Connection {
            key,
            stream,
            created_at: now,
            last_used_at: now,
            requests_served: 0,
            keep_alive: true,
            closed: false,
        }
    }

    /// The key this connection was opened for.
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Mutable access to the underlying stream, for the H1/WS engines.
    pub fn stream_mut(&mut self) -> &mut BoxStream {
        &mut self.stream
    }

    /// Consumes the connection, handing back the bare stream (used when a
    /// WS/SSE session detaches it from pool ownership entirely, per
    /// `spec.md` §2 "the connection is detached from the pool").
    pub fn into_stream(self) -> BoxStream {
        self.stream
    }

    /// When this connection was first opened.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When this connection last completed (or started) an exchange.
    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// How many requests have been served on this connection so far.
    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    /// Whether the server allows this connection to be reused.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive && !self.closed
    }

    /// Whether the connection has been explicitly closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Records that one more request/response exchange completed.
    /// `requests_served` is monotonic per the `spec.md` §3 invariant.
    pub fn record_exchange(&mut self) {
        self.requests_served += 1;
        self.last_used_at = Instant::now();
    }

    /// Updates whether the connection may be reused, based on the
    /// `Connection` response header (`spec.md` §4.4).
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    /// Marks the connection closed. A closed connection is never handed
    /// out by a pool again.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Performs the stale-connection heartbeat peek described in
    /// `spec.md` §4.4: before reusing an idle connection, check for
    /// unexpected EOF or stray data.
    pub fn peek_is_stale(&mut self) -> bool {
        !matches!(self.stream.peek_is_stale(), PeekOutcome::Alive)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("requests_served", &self.requests_served)
            .field("keep_alive", &self.keep_alive)
            .field("closed", &self.closed)
            .finish()
    }
}

//! Error types returned by this crate.

use std::{error::Error as StdError, fmt, io, time::Duration};

use url::Url;

/// A `Result` alias where the `Err` case is `corvid_http::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error type used to carry an arbitrary underlying cause.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The error type for this crate.
///
/// Every variant in [`Kind`] is reachable through one of the `is_*`
/// predicates below; the `url()` accessor exposes the request URL the
/// error occurred against, when one is known.
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
    url: Option<Url>,
}

/// Which connect/read/write/pool-acquire/request phase a [`Kind::Timeout`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting for a TCP (or TLS) connect to complete.
    Connect,
    /// Waiting to read from an established connection.
    Read,
    /// Waiting to write to an established connection.
    Write,
    /// Waiting for a free slot in a connection pool.
    PoolAcquire,
    /// The end-to-end request deadline.
    Request,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeoutPhase::Connect => "connect",
            TimeoutPhase::Read => "read",
            TimeoutPhase::Write => "write",
            TimeoutPhase::PoolAcquire => "pool-acquire",
            TimeoutPhase::Request => "request",
        })
    }
}

#[derive(Debug)]
pub(crate) enum Kind {
    DnsFailed(Box<str>),
    ConnectFailed,
    TlsFailed,
    PoolAcquireTimeout,
    HttpParseError,
    BodyTooLarge { limit: u64 },
    Timeout(TimeoutPhase, Duration),
    TooManyRedirects { chain: Vec<Url> },
    DecompressionError,
    WsHandshakeFailed,
    WsProtocolError,
    WsFrameTooLarge,
    WsClosed(u16, String),
    SseConnectionError,
    SseParsingError,
    ConcurrentReadError,
    Builder,
    Request,
    Body,
    Status(http::StatusCode),
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
                url: None,
            }),
        }
    }

    pub(crate) fn with_url(mut self, url: Url) -> Self {
        self.inner.url = Some(url);
        self
    }

    pub(crate) fn dns_failed<E: Into<BoxError>>(host: &str, e: E) -> Error {
        Error::new(Kind::DnsFailed(host.into()), Some(e))
    }

    pub(crate) fn connect_failed<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::ConnectFailed, Some(e))
    }

    pub(crate) fn tls_failed<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::TlsFailed, Some(e))
    }

    pub(crate) fn pool_acquire_timeout() -> Error {
        Error::new::<BoxError>(Kind::PoolAcquireTimeout, None)
    }

    pub(crate) fn http_parse<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::HttpParseError, Some(e))
    }

    pub(crate) fn body_too_large(limit: u64) -> Error {
        Error::new::<BoxError>(Kind::BodyTooLarge { limit }, None)
    }

    pub(crate) fn timeout(phase: TimeoutPhase, after: Duration) -> Error {
        Error::new::<BoxError>(Kind::Timeout(phase, after), None)
    }

    pub(crate) fn too_many_redirects(chain: Vec<Url>) -> Error {
        Error::new::<BoxError>(Kind::TooManyRedirects { chain }, None)
    }

    pub(crate) fn decompression<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::DecompressionError, Some(e))
    }

    pub(crate) fn ws_handshake<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::WsHandshakeFailed, Some(e))
    }

    pub(crate) fn ws_protocol(msg: impl Into<String>) -> Error {
        Error::new::<BoxError>(Kind::WsProtocolError, Some(msg.into().into()))
    }

    pub(crate) fn ws_frame_too_large() -> Error {
        Error::new::<BoxError>(Kind::WsFrameTooLarge, None)
    }

    pub(crate) fn ws_closed(code: u16, reason: impl Into<String>) -> Error {
        Error::new::<BoxError>(Kind::WsClosed(code, reason.into()), None)
    }

    pub(crate) fn sse_connection(msg: impl Into<String>) -> Error {
        Error::new::<BoxError>(Kind::SseConnectionError, Some(msg.into().into()))
    }

    pub(crate) fn sse_parsing(msg: impl Into<String>) -> Error {
        Error::new::<BoxError>(Kind::SseParsingError, Some(msg.into().into()))
    }

    pub(crate) fn concurrent_read() -> Error {
        Error::new::<BoxError>(Kind::ConcurrentReadError, None)
    }

    pub(crate) fn builder<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Builder, Some(e))
    }

    pub(crate) fn request<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Request, Some(e))
    }

    pub(crate) fn body<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Body, Some(e))
    }

    pub(crate) fn status(code: http::StatusCode) -> Error {
        Error::new::<BoxError>(Kind::Status(code), None)
    }
}

impl Error {
    /// The URL the request was made against, if known.
    pub fn url(&self) -> Option<&Url> {
        self.inner.url.as_ref()
    }

    /// Returns true if the error came from DNS resolution.
    pub fn is_dns(&self) -> bool {
        matches!(self.inner.kind, Kind::DnsFailed(_))
    }

    /// Returns true if the error came from failing to establish a TCP connection.
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::ConnectFailed)
    }

    /// Returns true if the error came from a TLS handshake or verification failure.
    pub fn is_tls(&self) -> bool {
        matches!(self.inner.kind, Kind::TlsFailed)
    }

    /// Returns true if the error is a pool-acquire timeout.
    pub fn is_pool_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::PoolAcquireTimeout)
    }

    /// Returns true if the error is related to a timeout of any phase.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::Timeout(..) | Kind::PoolAcquireTimeout
        )
    }

    /// Returns the timed-out phase, if this error is a [`Kind::Timeout`].
    pub fn timeout_phase(&self) -> Option<TimeoutPhase> {
        match self.inner.kind {
            Kind::Timeout(phase, _) => Some(phase),
            _ => None,
        }
    }

    /// Returns true if the error is a malformed HTTP/1.1 message.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::HttpParseError)
    }

    /// Returns true if a response body exceeded a caller-specified cap.
    pub fn is_body_too_large(&self) -> bool {
        matches!(self.inner.kind, Kind::BodyTooLarge { .. })
    }

    /// Returns true if the error came from exceeding the redirect limit.
    pub fn is_redirect(&self) -> bool {
        matches!(self.inner.kind, Kind::TooManyRedirects { .. })
    }

    /// Returns the redirect chain, if this error is [`Kind::TooManyRedirects`].
    pub fn redirect_chain(&self) -> Option<&[Url]> {
        match &self.inner.kind {
            Kind::TooManyRedirects { chain } => Some(chain),
            _ => None,
        }
    }

    /// Returns true if the error came from decoding a compressed body.
    pub fn is_decode(&self) -> bool {
        matches!(self.inner.kind, Kind::DecompressionError)
    }

    /// Returns true if the error came from the WebSocket engine.
    pub fn is_websocket(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::WsHandshakeFailed
                | Kind::WsProtocolError
                | Kind::WsFrameTooLarge
                | Kind::WsClosed(..)
        )
    }

    /// Returns the close code/reason, if the error is [`Kind::WsClosed`].
    pub fn ws_close(&self) -> Option<(u16, &str)> {
        match &self.inner.kind {
            Kind::WsClosed(code, reason) => Some((*code, reason.as_str())),
            _ => None,
        }
    }

    /// Returns true if the error came from the SSE engine.
    pub fn is_sse(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::SseConnectionError | Kind::SseParsingError
        )
    }

    /// Returns true if a second, concurrent read was attempted on a WS/SSE session.
    pub fn is_concurrent_read(&self) -> bool {
        matches!(self.inner.kind, Kind::ConcurrentReadError)
    }

    /// Returns true if the error came from building a request/client.
    pub fn is_builder(&self) -> bool {
        matches!(self.inner.kind, Kind::Builder)
    }

    /// Returns true if the error is a transport-level send/receive failure.
    pub fn is_request(&self) -> bool {
        matches!(self.inner.kind, Kind::Request)
    }

    /// Returns true if the error came from reading/writing a request or response body.
    pub fn is_body(&self) -> bool {
        matches!(self.inner.kind, Kind::Body)
    }

    /// Returns the status code, if this error was raised from `Response::error_for_status`.
    pub fn status(&self) -> Option<http::StatusCode> {
        match self.inner.kind {
            Kind::Status(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.kind {
            Kind::DnsFailed(host) => write!(f, "dns resolution failed for `{host}`")?,
            Kind::ConnectFailed => f.write_str("tcp connect failed")?,
            Kind::TlsFailed => f.write_str("tls handshake failed")?,
            Kind::PoolAcquireTimeout => f.write_str("timed out waiting for a pool slot")?,
            Kind::HttpParseError => f.write_str("malformed http/1.1 message")?,
            Kind::BodyTooLarge { limit } => {
                write!(f, "response body exceeded the {limit}-byte cap")?
            }
            Kind::Timeout(phase, after) => write!(f, "{phase} timed out after {after:?}")?,
            Kind::TooManyRedirects { chain } => {
                write!(f, "too many redirects ({} hops)", chain.len())?
            }
            Kind::DecompressionError => f.write_str("corrupt compressed body")?,
            Kind::WsHandshakeFailed => f.write_str("websocket upgrade handshake failed")?,
            Kind::WsProtocolError => f.write_str("websocket protocol violation")?,
            Kind::WsFrameTooLarge => f.write_str("websocket frame exceeded the size limit")?,
            Kind::WsClosed(code, reason) => write!(f, "websocket closed ({code}): {reason}")?,
            Kind::SseConnectionError => f.write_str("server-sent events connection failed")?,
            Kind::SseParsingError => f.write_str("malformed server-sent event")?,
            Kind::ConcurrentReadError => {
                f.write_str("concurrent read on the same session is not allowed")?
            }
            Kind::Builder => f.write_str("builder error")?,
            Kind::Request => f.write_str("error sending request")?,
            Kind::Body => f.write_str("request or response body error")?,
            Kind::Status(code) => write!(f, "http status error ({code})")?,
        }

        if let Some(url) = &self.inner.url {
            write!(f, " for url ({url})")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut b = f.debug_struct("corvid_http::Error");
        b.field("kind", &self.inner.kind);
        if let Some(url) = &self.inner.url {
            b.field("url", url);
        }
        if let Some(source) = &self.inner.source {
            b.field("source", source);
        }
        b.finish()
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_deref().map(|e| e as _)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::request(e)
    }
}

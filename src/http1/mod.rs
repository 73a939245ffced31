//! The HTTP/1.1 engine: request emission, response parsing, and the
//! stale-connection retry dance (`spec.md` §4.4).

pub mod body;
pub mod chunked;
pub mod decompress;
pub mod multipart;
pub mod request;
pub mod response;

use crate::connect::Connector;
use crate::error::{Error, Result};
use crate::pool::Origin;
use crate::request::{Method, Request};
use crate::timeout::{DeadlineClock, Timeouts};
use body::BodySource;
use response::{BodyFraming, Http1Body, RawResponseHead};

/// The outcome of one request/response exchange: the parsed head plus a
/// body handle the caller drives to completion (or drops, forcing
/// connection closure per the release discipline).
pub struct Exchange {
    pub head: RawResponseHead,
    pub body: Http1Body,
}

/// Runs one HTTP/1.1 exchange over a connection acquired from `connector`.
///
/// Implements the "stale-connection heartbeat" and "at-most-once
/// stale-retry" behaviors from `spec.md` §4.4/§8: a non-blocking peek
/// guards against handing a request to a connection the peer already
/// closed, and a first-write failure retries once against a freshly
/// dialed connection when the request body is replayable.
pub async fn execute(
    connector: &Connector,
    request: Request,
    timeouts: &Timeouts,
    user_agent: &str,
) -> Result<Exchange> {
    let origin = Origin::from_url(request.url())
        .ok_or_else(|| Error::builder("request URL has no http(s)/ws(s) scheme"))?;
    let url_str = request.url().as_str().to_owned();
    let clock = DeadlineClock::start(timeouts);
    let method = request.method();
    let is_head = method == Method::Head;

    let mut lease = connector.acquire(origin.clone(), &url_str, timeouts, &clock).await?;
    if lease.connection_mut().peek_is_stale() {
        lease.discard();
        lease = connector.acquire(origin.clone(), &url_str, timeouts, &clock).await?;
    }

    let retry_request = clone_if_replayable(&request);
    let key = lease.connection().key().clone();

    match run_once(&mut lease, request, &key, user_agent, &clock, timeouts).await {
        Ok(()) => {}
        Err(e) if e.is_request() => {
            let Some(retry) = retry_request else {
                return Err(e);
            };
            log::debug!("first write failed on a connection, retrying once: {e}");
            lease.connection_mut().set_keep_alive(false);
            lease.discard();
            let mut fresh = connector.acquire(origin, &url_str, timeouts, &clock).await?;
            let fresh_key = fresh.connection().key().clone();
            run_once(&mut fresh, retry, &fresh_key, user_agent, &clock, timeouts).await?;
            lease = fresh;
        }
        Err(e) => return Err(e),
    }

    let head = clock
        .run(
            crate::error::TimeoutPhase::Read,
            timeouts.sock_read,
            response::read_head(lease.connection_mut().stream_mut()),
        )
        .await??;

    let (framing, server_keep_alive) = response::determine_framing(&head, is_head);
    if !server_keep_alive {
        lease.connection_mut().set_keep_alive(false);
    }

    Ok(Exchange {
        head,
        body: Http1Body::new(lease, framing),
    })
}

async fn run_once(
    lease: &mut crate::connect::Lease,
    request: Request,
    key: &crate::pool::ConnectionKey,
    user_agent: &str,
    clock: &DeadlineClock,
    timeouts: &Timeouts,
) -> Result<()> {
    clock
        .run(
            crate::error::TimeoutPhase::Write,
            timeouts.sock_read,
            request::write_request(lease.connection_mut().stream_mut(), request, key, user_agent),
        )
        .await?
}

/// Builds a retry-safe copy of `request` when its body can be re-sent
/// unchanged: no body, or a fully-buffered byte body. Lazy streams and
/// multipart bodies with streamed parts are not replayable, so no retry
/// is attempted for them.
fn clone_if_replayable(request: &Request) -> Option<Request> {
    let body = match request.body() {
        BodySource::None => BodySource::None,
        BodySource::Bytes(b) => BodySource::Bytes(b.clone()),
        BodySource::Stream(_) | BodySource::Multipart(_) => return None,
    };
    let mut clone = Request::new(request.method(), request.url().clone());
    clone.headers_mut().merge(request.headers());
    clone.set_body(body);
    Some(clone)
}

/// Decodes a body stream according to the response's `Content-Encoding`,
/// if recognized (`spec.md` §4.4).
pub fn maybe_decompress(
    content_encoding: Option<&str>,
    stream: body::ByteStream,
) -> body::ByteStream {
    match content_encoding.and_then(decompress::ContentEncoding::parse) {
        Some(encoding) => decompress::decode_stream(encoding, stream),
        None => stream,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request as Req;

    #[test]
    fn replayable_clone_preserves_method_and_headers() {
        let url = url::Url::parse("http://example.com/a").unwrap();
        let mut req = Req::new(Method::Post, url);
        req.set_body(BodySource::Bytes(bytes::Bytes::from_static(b"x")));
        req.headers_mut()
            .append(http::header::CONTENT_TYPE, http::HeaderValue::from_static("text/plain"));

        let clone = clone_if_replayable(&req).unwrap();
        assert_eq!(clone.method(), Method::Post);
        assert!(clone.headers().contains(&http::header::CONTENT_TYPE));
    }

    #[test]
    fn stream_body_is_not_replayable() {
        let url = url::Url::parse("http://example.com/a").unwrap();
        let mut req = Req::new(Method::Post, url);
        let stream: body::ByteStream = Box::pin(futures_util::stream::empty());
        req.set_body(BodySource::Stream(stream));
        assert!(clone_if_replayable(&req).is_none());
    }
}

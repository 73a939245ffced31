//! WebSocket upgrade handshake (`spec.md` §4.6).

use base64::Engine;
use http::{HeaderName, HeaderValue};
use rand::RngCore;
use sha1::{Digest, Sha1};
use url::Url;

use crate::connect::Connector;
use crate::error::{Error, Result};
use crate::header::HeaderStore;
use crate::http1::{request, response};
use crate::pool::{Connection, Origin};
use crate::request::{Method, Request};
use crate::timeout::{DeadlineClock, Timeouts};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Generates a fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
pub fn generate_key() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// Computes the expected `Sec-WebSocket-Accept` value for `key`
/// (`spec.md` §4.6, §6 "SHA-1 accept computation").
pub fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Performs the HTTP/1.1 Upgrade handshake and, on success, detaches the
/// underlying connection from pool ownership for the WS session
/// (`spec.md` §4.6, §2 "the connection is detached from the pool").
///
/// Returns the raw connection plus the server-negotiated subprotocol, if any.
pub async fn perform(
    connector: &Connector,
    url: Url,
    protocol: Option<&str>,
    extra_headers: &HeaderStore,
    timeouts: &Timeouts,
    user_agent: &str,
) -> Result<(Connection, Option<String>)> {
    let key = generate_key();
    let mut request = Request::new(Method::Get, url.clone());
    request.headers_mut().merge(extra_headers);
    request
        .headers_mut()
        .insert(http::header::UPGRADE, HeaderValue::from_static("websocket"));
    request
        .headers_mut()
        .insert(http::header::CONNECTION, HeaderValue::from_static("Upgrade"));
    request.headers_mut().insert(
        HeaderName::from_static("sec-websocket-version"),
        HeaderValue::from_static("13"),
    );
    request.headers_mut().insert(
        HeaderName::from_static("sec-websocket-key"),
        HeaderValue::from_str(&key).map_err(Error::builder)?,
    );
    if let Some(p) = protocol {
        request.headers_mut().insert(
            HeaderName::from_static("sec-websocket-protocol"),
            HeaderValue::from_str(p).map_err(Error::builder)?,
        );
    }

    let origin = Origin::from_url(&url).ok_or_else(|| Error::builder("ws(s) URL has no host"))?;
    let url_str = url.as_str().to_owned();
    let clock = DeadlineClock::start(timeouts);
    let mut lease = connector.acquire(origin, &url_str, timeouts, &clock).await?;
    let conn_key = lease.connection().key().clone();

    request::write_request(lease.connection_mut().stream_mut(), request, &conn_key, user_agent)
        .await?;
    let head = response::read_head(lease.connection_mut().stream_mut()).await?;

    if head.status.as_u16() != 101 {
        return Err(Error::ws_handshake(format!(
            "expected 101 Switching Protocols, got {}",
            head.status
        ))
        .with_url(url));
    }

    let upgrade_ok = head
        .headers
        .get(&http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let connection_ok = head
        .headers
        .get(&http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);
    if !upgrade_ok || !connection_ok {
        return Err(Error::ws_handshake("missing Upgrade/Connection response headers").with_url(url));
    }

    let accept_header = HeaderName::from_static("sec-websocket-accept");
    let accept = head
        .headers
        .get(&accept_header)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::ws_handshake("missing Sec-WebSocket-Accept").with_url(url.clone()))?;
    if accept != compute_accept(&key) {
        return Err(Error::ws_handshake("Sec-WebSocket-Accept mismatch").with_url(url));
    }

    let negotiated_protocol = head
        .headers
        .get(&HeaderName::from_static("sec-websocket-protocol"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    Ok((lease.detach(), negotiated_protocol))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_matches_rfc6455_worked_example() {
        // The example key/accept pair from RFC 6455 §1.3.
        assert_eq!(
            compute_accept("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn generated_keys_are_16_bytes_base64() {
        let key = generate_key();
        let decoded = base64::engine::general_purpose::STANDARD.decode(&key).unwrap();
        assert_eq!(decoded.len(), 16);
    }
}

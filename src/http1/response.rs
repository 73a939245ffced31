//! Status line/header parsing and response body framing (`spec.md` §4.4
//! "Response reception").

use bytes::Bytes;
use http::{HeaderValue, StatusCode};

use crate::connect::Lease;
use crate::error::{BoxError, Error, Result};
use crate::header::HeaderStore;
use crate::http1::body::ByteStream;
use crate::http1::chunked;

const MAX_HEADER_BLOCK: usize = 64 * 1024;

/// A parsed status line + header block, before any body has been read.
pub struct RawResponseHead {
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderStore,
}

/// How the response body is framed on the wire (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body at all (e.g. 204, 304, or a HEAD response).
    None,
    Chunked,
    Length(u64),
    /// Body runs until the connection closes; implies `keep_alive=false`.
    Eof,
}

/// Reads the status line and header block from `r`, stopping at the first
/// `CRLFCRLF`. Rejects header blocks over 64 KiB (`spec.md` §4.4).
pub async fn read_head<R: tokio::io::AsyncRead + Unpin>(r: &mut R) -> Result<RawResponseHead> {
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = r.read(&mut byte).await.map_err(Error::request)?;
        if n == 0 {
            return Err(Error::http_parse("connection closed before response headers completed"));
        }
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            break;
        }
        if buf.len() > MAX_HEADER_BLOCK {
            return Err(Error::http_parse("response header block exceeds 64 KiB"));
        }
    }

    parse_head(&buf)
}

fn parse_head(buf: &[u8]) -> Result<RawResponseHead> {
    let text = std::str::from_utf8(buf).map_err(|_| Error::http_parse("non-utf8 response head"))?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let (status, reason) = parse_status_line(status_line)?;

    let mut headers = HeaderStore::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::http_parse("malformed response header line"))?;
        let name = http::HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| Error::http_parse("invalid response header name"))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| Error::http_parse("invalid response header value"))?;
        headers.append(name, value);
    }

    Ok(RawResponseHead { status, reason, headers })
}

/// Tolerantly parses `HTTP/1.x CODE [reason]`: an empty reason is allowed,
/// but the HTTP-version token must be `HTTP/1.x` (`spec.md` §4.4).
fn parse_status_line(line: &str) -> Result<(StatusCode, String)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(Error::http_parse("unsupported or missing HTTP-version token"));
    }
    let code = parts
        .next()
        .ok_or_else(|| Error::http_parse("missing status code"))?;
    let status = code
        .parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| Error::http_parse("invalid status code"))?;
    let reason = parts.next().unwrap_or("").to_owned();
    Ok((status, reason))
}

/// Determines body framing and the resulting keep-alive state from the
/// parsed head (`spec.md` §4.4).
pub fn determine_framing(head: &RawResponseHead, is_head_request: bool) -> (BodyFraming, bool) {
    let mut keep_alive = true;
    if let Some(conn) = head.headers.get(&http::header::CONNECTION) {
        if conn.to_str().unwrap_or("").eq_ignore_ascii_case("close") {
            keep_alive = false;
        }
    }

    if is_head_request
        || matches!(head.status.as_u16(), 204 | 304)
        || (100..200).contains(&head.status.as_u16())
    {
        return (BodyFraming::None, keep_alive);
    }

    if let Some(te) = head.headers.get(&http::header::TRANSFER_ENCODING) {
        if te.to_str().unwrap_or("").eq_ignore_ascii_case("chunked") {
            return (BodyFraming::Chunked, keep_alive);
        }
    }

    if let Some(len) = head.headers.get(&http::header::CONTENT_LENGTH) {
        if let Ok(n) = len.to_str().unwrap_or("").parse::<u64>() {
            return (BodyFraming::Length(n), keep_alive);
        }
    }

    (BodyFraming::Eof, false)
}

/// A response body driven by a leased connection, consumed at most once
/// and returning the connection to its pool (or discarding it) exactly
/// when the framing is exhausted (`spec.md` §4.4 "Release discipline").
pub struct Http1Body {
    lease: Option<Lease>,
    framing: BodyFraming,
    remaining: u64,
    finished: bool,
}

impl Http1Body {
    pub fn new(lease: Lease, framing: BodyFraming) -> Self {
        let remaining = match framing {
            BodyFraming::Length(n) => n,
            _ => 0,
        };
        Http1Body {
            lease: Some(lease),
            framing,
            remaining,
            finished: matches!(framing, BodyFraming::None),
        }
    }

    /// Reads the next chunk, or `None` once the body is fully consumed.
    /// On exhaustion the connection is released back to its pool.
    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        let lease = self.lease.as_mut().expect("body polled after release");

        let chunk = match self.framing {
            BodyFraming::None => None,
            BodyFraming::Chunked => chunked::read_chunk(lease.connection_mut().stream_mut())
                .await?
                .map(Bytes::from),
            BodyFraming::Length(_) => {
                if self.remaining == 0 {
                    None
                } else {
                    use tokio::io::AsyncReadExt;
                    let take = self.remaining.min(64 * 1024) as usize;
                    let mut buf = vec![0u8; take];
                    lease
                        .connection_mut()
                        .stream_mut()
                        .read_exact(&mut buf)
                        .await
                        .map_err(Error::request)?;
                    self.remaining -= take as u64;
                    Some(Bytes::from(buf))
                }
            }
            BodyFraming::Eof => {
                use tokio::io::AsyncReadExt;
                let mut buf = vec![0u8; 64 * 1024];
                let n = lease
                    .connection_mut()
                    .stream_mut()
                    .read(&mut buf)
                    .await
                    .map_err(Error::request)?;
                if n == 0 {
                    None
                } else {
                    buf.truncate(n);
                    Some(Bytes::from(buf))
                }
            }
        };

        if chunk.is_none() {
            self.finish();
        }
        Ok(chunk)
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(mut lease) = self.lease.take() {
            lease.connection_mut().record_exchange();
            lease.mark_request_served();
            lease.release();
        }
    }

    /// Converts this body into a lazy [`ByteStream`] (`spec.md` §4.4
    /// `read_chunks()`).
    pub fn into_stream(self) -> ByteStream {
        Box::pin(futures_util::stream::unfold(self, |mut body| async move {
            match body.next().await {
                Ok(Some(chunk)) => Some((Ok(chunk), body)),
                Ok(None) => None,
                Err(e) => Some((Err(Box::new(e) as BoxError), body)),
            }
        }))
    }
}

impl Drop for Http1Body {
    fn drop(&mut self) {
        if !self.finished {
            // Dropped without full consumption: force keep_alive=false and
            // discard rather than risk returning a partially-read
            // connection to the pool (`spec.md` §4.4 "Release discipline").
            if let Some(mut lease) = self.lease.take() {
                lease.connection_mut().set_keep_alive(false);
                lease.discard();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tolerant_status_line_with_empty_reason() {
        let (status, reason) = parse_status_line("HTTP/1.1 204").unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(reason, "");
    }

    #[test]
    fn rejects_non_http1_version_token() {
        let err = parse_status_line("HTTP/2 200 OK").unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn parses_full_head_block() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\n";
        let head = parse_head(raw).unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(
            head.headers.get(&http::header::CONTENT_LENGTH).unwrap(),
            "5"
        );
    }

    #[test]
    fn framing_prefers_chunked_over_content_length() {
        let mut headers = HeaderStore::new();
        headers.append(http::header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.append(http::header::CONTENT_LENGTH, HeaderValue::from_static("10"));
        let head = RawResponseHead {
            status: StatusCode::OK,
            reason: "OK".into(),
            headers,
        };
        let (framing, keep_alive) = determine_framing(&head, false);
        assert_eq!(framing, BodyFraming::Chunked);
        assert!(keep_alive);
    }

    #[test]
    fn connection_close_forces_keep_alive_false() {
        let mut headers = HeaderStore::new();
        headers.append(http::header::CONNECTION, HeaderValue::from_static("close"));
        headers.append(http::header::CONTENT_LENGTH, HeaderValue::from_static("3"));
        let head = RawResponseHead {
            status: StatusCode::OK,
            reason: "OK".into(),
            headers,
        };
        let (_, keep_alive) = determine_framing(&head, false);
        assert!(!keep_alive);
    }

    #[test]
    fn no_framing_headers_falls_back_to_eof() {
        let head = RawResponseHead {
            status: StatusCode::OK,
            reason: "OK".into(),
            headers: HeaderStore::new(),
        };
        let (framing, keep_alive) = determine_framing(&head, false);
        assert_eq!(framing, BodyFraming::Eof);
        assert!(!keep_alive);
    }

    #[test]
    fn head_request_has_no_body() {
        let head = RawResponseHead {
            status: StatusCode::OK,
            reason: "OK".into(),
            headers: HeaderStore::new(),
        };
        let (framing, _) = determine_framing(&head, true);
        assert_eq!(framing, BodyFraming::None);
    }
}

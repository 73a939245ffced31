//! The public response type: streamed or buffered body, charset
//! detection, JSON parsing, chunk iteration (`spec.md` §3, §4.4 C8).

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::StatusCode;
use url::Url;

use crate::error::{Error, Result};
use crate::header::HeaderStore;
use crate::http1::body::ByteStream;
use crate::http1::response::Http1Body;
use crate::http1::{self as h1};

enum BodyState {
    Pending(Http1Body),
    Buffered(Bytes),
    Streaming,
}

/// An HTTP response: status, headers, and a body that may be buffered,
/// streamed, or not yet touched.
///
/// Every accessor that consumes the body (`content`, `text`, `json`,
/// `read_chunks`) may be called at most once, except that `content`/
/// `text`/`json` may be called repeatedly once the body has been
/// buffered by any of them (`spec.md` §4.4).
pub struct Response {
    status: StatusCode,
    headers: HeaderStore,
    url: Url,
    body: Option<BodyState>,
}

impl Response {
    pub(crate) fn new(status: StatusCode, headers: HeaderStore, url: Url, body: Http1Body) -> Self {
        Response {
            status,
            headers,
            url,
            body: Some(BodyState::Pending(body)),
        }
    }

    /// The response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers, exactly as received (raw `Content-Encoding`
    /// included even though the decoded body is what `content`/`text`
    /// expose — `spec.md` §4.4).
    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    /// The final URL this response was received from (post-redirects, if
    /// the caller followed any).
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Turns a 4xx/5xx response into `Err(Error::status(..))`, passing
    /// through unchanged otherwise.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_client_error() || self.status.is_server_error() {
            Err(Error::status(self.status).with_url(self.url.clone()))
        } else {
            Ok(self)
        }
    }

    fn content_encoding(&self) -> Option<String> {
        self.headers
            .get(&http::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Buffers the full (decompressed) body, returning it as `Bytes`.
    /// Safe to call again once buffered; fails if `read_chunks` already
    /// took the body as a stream.
    pub async fn content(&mut self) -> Result<Bytes> {
        match self.body.take() {
            Some(BodyState::Buffered(bytes)) => {
                self.body = Some(BodyState::Buffered(bytes.clone()));
                Ok(bytes)
            }
            Some(BodyState::Pending(body)) => {
                let encoding = self.content_encoding();
                let stream = h1::maybe_decompress(encoding.as_deref(), body.into_stream());
                let bytes = buffer_stream(stream).await?;
                self.body = Some(BodyState::Buffered(bytes.clone()));
                Ok(bytes)
            }
            Some(BodyState::Streaming) => Err(Error::body(std::io::Error::other(
                "response body was already taken as a chunk stream",
            ))),
            None => Err(Error::body(std::io::Error::other("response body already consumed"))),
        }
    }

    /// Decodes the buffered body as text, using `encoding` if given or
    /// sniffing a charset from `Content-Type`/BOM otherwise (`spec.md`
    /// §4.4: "sniff via character-set detection").
    pub async fn text(&mut self, encoding: Option<&'static encoding_rs::Encoding>) -> Result<String> {
        let bytes = self.content().await?;
        let enc = encoding.unwrap_or_else(|| sniff_encoding(&self.headers, &bytes));
        let (decoded, _, _) = enc.decode(&bytes);
        Ok(decoded.into_owned())
    }

    /// Parses the buffered body as JSON, regardless of `Content-Type`
    /// (`spec.md` §4.4).
    pub async fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.content().await?;
        serde_json::from_slice(&bytes).map_err(Error::body)
    }

    /// Takes the body as a lazy stream of (decompressed) chunks. May only
    /// be called once, and not after `content`/`text`/`json`.
    pub fn read_chunks(&mut self) -> Result<ByteStream> {
        match self.body.take() {
            Some(BodyState::Pending(body)) => {
                let encoding = self.content_encoding();
                self.body = Some(BodyState::Streaming);
                Ok(h1::maybe_decompress(encoding.as_deref(), body.into_stream()))
            }
            Some(other) => {
                self.body = Some(other);
                Err(Error::body(std::io::Error::other(
                    "response body was already consumed",
                )))
            }
            None => Err(Error::body(std::io::Error::other("response body already consumed"))),
        }
    }
}

async fn buffer_stream(mut stream: ByteStream) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Error::body)?;
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Sniffs a charset: BOM first, then `Content-Type`'s `charset` param,
/// falling back to UTF-8.
fn sniff_encoding(headers: &HeaderStore, bytes: &[u8]) -> &'static encoding_rs::Encoding {
    if let Some((enc, _)) = encoding_rs::Encoding::for_bom(bytes) {
        return enc;
    }
    if let Some(ct) = headers.get(&http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        if let Some(charset) = charset_param(ct) {
            if let Some(enc) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
                return enc;
            }
        }
    }
    encoding_rs::UTF_8
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let part = part.trim();
        let eq = part.find('=')?;
        let (name, value) = part.split_at(eq);
        if !name.eq_ignore_ascii_case("charset") {
            return None;
        }
        Some(value[1..].trim_matches('"').to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_param_extracts_quoted_and_bare() {
        assert_eq!(charset_param("text/html; charset=utf-8"), Some("utf-8".into()));
        assert_eq!(charset_param("text/html; charset=\"iso-8859-1\""), Some("iso-8859-1".into()));
        assert_eq!(charset_param("text/html"), None);
    }

    #[test]
    fn charset_param_name_is_case_insensitive() {
        assert_eq!(charset_param("text/html; Charset=UTF-8"), Some("UTF-8".into()));
        assert_eq!(charset_param("text/html; CHARSET=\"utf-8\""), Some("utf-8".into()));
    }

    fn buffered_response(status: StatusCode) -> Response {
        Response {
            status,
            headers: HeaderStore::new(),
            url: Url::parse("http://example.com/").unwrap(),
            body: Some(BodyState::Buffered(Bytes::new())),
        }
    }

    #[test]
    fn error_for_status_passes_through_success() {
        assert!(buffered_response(StatusCode::OK).error_for_status().is_ok());
    }

    #[test]
    fn error_for_status_rejects_4xx() {
        let err = buffered_response(StatusCode::NOT_FOUND).error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn content_is_idempotent_once_buffered() {
        let mut response = buffered_response(StatusCode::OK);
        let a = response.content().await.unwrap();
        let b = response.content().await.unwrap();
        assert_eq!(a, b);
    }
}

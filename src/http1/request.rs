//! HTTP/1.1 request-line and header emission (`spec.md` §4.4 "Request emission").

use bytes::Bytes;
use http::header::{self, HeaderValue};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::header::HeaderStore;
use crate::http1::body::BodySource;
use crate::http1::chunked;
use crate::pool::ConnectionKey;
use crate::request::Request;

/// How the request body is framed on the wire, decided once per request.
enum Framing {
    None,
    ContentLength(u64),
    Chunked,
}

fn decide_framing(body: &BodySource) -> Framing {
    match body.known_length() {
        Some(0) if body.is_empty() => Framing::None,
        Some(n) => Framing::ContentLength(n),
        None => Framing::Chunked,
    }
}

/// The request-target written on the start line: path+query normally, or
/// the absolute-URI form when talking to a plain-HTTP proxy directly
/// (`spec.md` §4.2/§4.4).
fn request_target(request: &Request, key: &ConnectionKey) -> String {
    if key.uses_proxy_absolute_form() {
        request.url().as_str().to_owned()
    } else {
        let mut target = request.url().path().to_owned();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = request.url().query() {
            target.push('?');
            target.push_str(query);
        }
        target
    }
}

fn host_header_value(request: &Request) -> Result<HeaderValue> {
    let url = request.url();
    let host = url.host_str().ok_or_else(|| Error::builder("request URL has no host"))?;
    let value = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    HeaderValue::from_str(&value).map_err(Error::builder)
}

/// Builds the base headers every request carries unless the caller
/// overrode them: `Host`, `User-Agent`, `Accept`, `Connection`,
/// `Accept-Encoding` (`spec.md` §4.4).
fn base_headers(request: &Request, user_agent: &str) -> Result<HeaderStore> {
    let mut base = HeaderStore::new();
    base.append(header::HOST, host_header_value(request)?);
    base.append(
        header::USER_AGENT,
        HeaderValue::from_str(user_agent).map_err(Error::builder)?,
    );
    base.append(header::ACCEPT, HeaderValue::from_static("*/*"));
    base.append(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    if cfg!(any(feature = "gzip", feature = "deflate")) {
        base.append(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static(accept_encoding_value()),
        );
    }
    Ok(base)
}

fn accept_encoding_value() -> &'static str {
    match (cfg!(feature = "gzip"), cfg!(feature = "deflate")) {
        (true, true) => "gzip, deflate",
        (true, false) => "gzip",
        (false, true) => "deflate",
        (false, false) => "identity",
    }
}

/// Merges the base headers with the caller's, with the caller's headers
/// taking precedence for singleton fields (`Host`, `Connection`, etc. are
/// overridden if the caller explicitly set them) while still allowing
/// duplicates for repeatable fields, per `spec.md` §4.4 "user headers
/// merged preserving case; duplicates permitted".
fn merged_headers(base: HeaderStore, user: &HeaderStore) -> HeaderStore {
    let mut merged = base;
    for singleton in [
        &header::HOST,
        &header::CONNECTION,
        &header::USER_AGENT,
        &header::ACCEPT,
        &header::ACCEPT_ENCODING,
    ] {
        if user.contains(singleton) {
            merged.remove(singleton);
        }
    }
    merged.merge(user);
    merged
}

/// Writes the full request head (start line + headers + blank line) to
/// `w`. Returns the decided body [`Framing`] so the caller knows how to
/// stream the body afterward.
async fn write_head<W: AsyncWrite + Unpin>(
    w: &mut W,
    request: &Request,
    key: &ConnectionKey,
    user_agent: &str,
) -> Result<Framing> {
    let framing = decide_framing(request.body());
    let target = request_target(request, key);
    let start_line = format!("{} {} HTTP/1.1\r\n", request.method().as_str(), target);
    w.write_all(start_line.as_bytes()).await.map_err(Error::request)?;

    let base = base_headers(request, user_agent)?;
    let mut headers = merged_headers(base, request.headers());

    match framing {
        Framing::ContentLength(n) => {
            headers.insert(
                header::CONTENT_LENGTH,
                HeaderValue::from_str(&n.to_string()).map_err(Error::builder)?,
            );
        }
        Framing::Chunked => {
            headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        Framing::None => {}
    }

    for (name, value) in headers.iter() {
        w.write_all(name.as_str().as_bytes()).await.map_err(Error::request)?;
        w.write_all(b": ").await.map_err(Error::request)?;
        w.write_all(value.as_bytes()).await.map_err(Error::request)?;
        w.write_all(b"\r\n").await.map_err(Error::request)?;
    }
    w.write_all(b"\r\n").await.map_err(Error::request)?;

    Ok(framing)
}

/// Writes an entire request (head + body) to `w`.
pub async fn write_request<W: AsyncWrite + Unpin>(
    w: &mut W,
    request: Request,
    key: &ConnectionKey,
    user_agent: &str,
) -> Result<()> {
    let framing = write_head(w, &request, key, user_agent).await?;
    write_body(w, request.body, framing).await
}

async fn write_body<W: AsyncWrite + Unpin>(
    w: &mut W,
    body: BodySource,
    framing: Framing,
) -> Result<()> {
    match (body, framing) {
        (BodySource::None, _) => {}
        (BodySource::Bytes(bytes), Framing::ContentLength(_)) => {
            w.write_all(&bytes).await.map_err(Error::request)?;
        }
        (BodySource::Multipart(multipart), Framing::ContentLength(_)) => {
            multipart.write_to(w).await?;
        }
        (BodySource::Multipart(multipart), Framing::Chunked) => {
            write_chunked_multipart(w, multipart).await?;
        }
        (BodySource::Stream(mut stream), Framing::Chunked) => {
            use futures_util::StreamExt;
            while let Some(chunk) = stream.next().await {
                let chunk: Bytes = chunk.map_err(Error::body)?;
                chunked::write_chunk(w, &chunk).await?;
            }
            chunked::write_terminator(w).await?;
        }
        (BodySource::Stream(mut stream), Framing::ContentLength(_)) => {
            use futures_util::StreamExt;
            while let Some(chunk) = stream.next().await {
                let chunk: Bytes = chunk.map_err(Error::body)?;
                w.write_all(&chunk).await.map_err(Error::request)?;
            }
        }
        (_, Framing::None) => {}
    }
    w.flush().await.map_err(Error::request)
}

async fn write_chunked_multipart<W: AsyncWrite + Unpin>(
    w: &mut W,
    multipart: crate::http1::multipart::Multipart,
) -> Result<()> {
    // No known length (a streamed file part): buffer per-part writes are
    // unavoidable for the boundary bookkeeping, but the payload itself is
    // still only ever held one chunk at a time via `Multipart::write_to`,
    // so interpose a chunked-framing sink.
    struct ChunkedSink<'a, W> {
        inner: &'a mut W,
    }

    impl<'a, W: AsyncWrite + Unpin> tokio::io::AsyncWrite for ChunkedSink<'a, W> {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            if buf.is_empty() {
                return std::task::Poll::Ready(Ok(0));
            }
            let framed = chunked::encode_chunk(buf);
            let this = self.get_mut();
            match std::pin::Pin::new(&mut *this.inner).poll_write(cx, &framed) {
                std::task::Poll::Ready(Ok(_)) => std::task::Poll::Ready(Ok(buf.len())),
                std::task::Poll::Ready(Err(e)) => std::task::Poll::Ready(Err(e)),
                std::task::Poll::Pending => std::task::Poll::Pending,
            }
        }
        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut *self.get_mut().inner).poll_flush(cx)
        }
        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
        }
    }

    {
        let mut sink = ChunkedSink { inner: w };
        multipart.write_to(&mut sink).await?;
    }
    chunked::write_terminator(w).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Origin, Scheme};
    use crate::request::Method;

    #[tokio::test]
    async fn direct_request_uses_path_and_query_target() {
        let url = url::Url::parse("http://example.com/a/b?x=1").unwrap();
        let request = Request::new(Method::Get, url);
        let key = ConnectionKey::direct(Origin::new(Scheme::Http, "example.com", None));

        let mut out = Vec::new();
        write_request(&mut out, request, &key, "corvid-http/0.1").await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("GET /a/b?x=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
    }

    #[tokio::test]
    async fn proxied_plain_http_uses_absolute_uri_target() {
        let url = url::Url::parse("http://example.com/a").unwrap();
        let request = Request::new(Method::Get, url);
        let key = ConnectionKey::via_proxy(
            Origin::new(Scheme::Http, "example.com", None),
            Origin::new(Scheme::Http, "proxy.local", Some(8080)),
        );

        let mut out = Vec::new();
        write_request(&mut out, request, &key, "corvid-http/0.1").await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("GET http://example.com/a HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn bytes_body_gets_content_length() {
        let url = url::Url::parse("http://example.com/a").unwrap();
        let mut request = Request::new(Method::Post, url);
        request.set_body(BodySource::Bytes(Bytes::from_static(b"hello")));
        let key = ConnectionKey::direct(Origin::new(Scheme::Http, "example.com", None));

        let mut out = Vec::new();
        write_request(&mut out, request, &key, "corvid-http/0.1").await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("hello"));
    }

    #[tokio::test]
    async fn stream_body_is_chunked() {
        let url = url::Url::parse("http://example.com/a").unwrap();
        let mut request = Request::new(Method::Post, url);
        let chunks: Vec<Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"foo")), Ok(Bytes::from_static(b"bar"))];
        let stream = futures_util::stream::iter(chunks.into_iter().map(|r| r.map_err(|e: crate::error::Error| -> crate::error::BoxError { Box::new(e) })));
        request.set_body(BodySource::Stream(Box::pin(stream)));
        let key = ConnectionKey::direct(Origin::new(Scheme::Http, "example.com", None));

        let mut out = Vec::new();
        write_request(&mut out, request, &key, "corvid-http/0.1").await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(text.ends_with("3\r\nfoo\r\n3\r\nbar\r\n0\r\n\r\n"));
    }
}

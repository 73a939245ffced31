//! Minimal loopback HTTP/1.1 test harness (`spec.md` §8 "loopback
//! `tokio::net::TcpListener` servers").
//!
//! This speaks the wire format by hand rather than through any hyper-style
//! server crate, so these tests exercise `corvid_http`'s client against a
//! server that makes no assumptions about the client's implementation.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct TestServer {
    pub addr: SocketAddr,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Spawns a background accept loop invoking `handler` once per connection.
pub async fn spawn<F, Fut>(handler: F) -> TestServer
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
    let addr = listener.local_addr().expect("local_addr");
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                handler(stream).await;
            });
        }
    });
    TestServer { addr }
}

/// One parsed HTTP/1.1 request head.
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
    /// Bytes read past the blank line terminating the head (the start of
    /// whatever body follows).
    pub leftover: Vec<u8>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Reads one request line + headers, stopping at the blank line. Returns
/// `None` if the peer closes the connection before sending another request
/// (the ordinary end of a keep-alive loop).
pub async fn read_request_head(stream: &mut TcpStream) -> Option<RequestHead> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    let head_end = loop {
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.expect("read request head");
        if n == 0 {
            if buf.is_empty() {
                return None;
            }
            panic!("connection closed mid-request-head");
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let leftover = buf[head_end..].to_vec();
    let head_text = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head_text.split("\r\n");
    let request_line = lines.next().expect("request line");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().expect("method").to_owned();
    let target = parts.next().expect("target").to_owned();

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    Some(RequestHead { method, target, headers, leftover })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Reads exactly `len` bytes of body, using whatever was already buffered
/// in `leftover` from [`read_request_head`].
pub async fn read_fixed_body(stream: &mut TcpStream, leftover: Vec<u8>, len: usize) -> Vec<u8> {
    let mut body = leftover;
    while body.len() < len {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.expect("read body");
        assert!(n > 0, "connection closed before body arrived");
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(len);
    body
}

/// Reads a chunked-transfer body to its terminating `0\r\n\r\n`, returning
/// the concatenated dechunked payload.
pub async fn read_chunked_body(stream: &mut TcpStream, leftover: Vec<u8>) -> Vec<u8> {
    let mut buf = leftover;
    let mut out = Vec::new();
    loop {
        while find_subslice(&buf, b"\r\n").is_none() {
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await.expect("read chunk size line");
            assert!(n > 0);
            buf.extend_from_slice(&chunk[..n]);
        }
        let line_end = find_subslice(&buf, b"\r\n").unwrap();
        let size_line = String::from_utf8_lossy(&buf[..line_end]).into_owned();
        let size = usize::from_str_radix(size_line.trim(), 16).expect("valid chunk size");
        buf.drain(0..line_end + 2);

        while buf.len() < size + 2 {
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await.expect("read chunk body");
            assert!(n > 0);
            buf.extend_from_slice(&chunk[..n]);
        }
        out.extend_from_slice(&buf[..size]);
        buf.drain(0..size + 2);

        if size == 0 {
            break;
        }
    }
    out
}

/// Writes a well-formed HTTP/1.1 response: status line, headers (including
/// `Content-Length` unless `chunked` body framing was requested by the
/// caller via an explicit `Transfer-Encoding` header), and body.
pub async fn write_response(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    extra_headers: &[(&str, String)],
    body: &[u8],
) {
    let mut out = format!("HTTP/1.1 {status} {reason}\r\n");
    let has_content_length = extra_headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-length"));
    if !has_content_length {
        out.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    for (name, value) in extra_headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    stream.write_all(out.as_bytes()).await.expect("write response head");
    stream.write_all(body).await.expect("write response body");
    stream.flush().await.expect("flush response");
}

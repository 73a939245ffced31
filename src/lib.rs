//! An async HTTP/1.1, WebSocket, and Server-Sent Events client with
//! connection pooling (`spec.md` §1 Overview).
//!
//! The crate is organized around a connector (DNS, dialing, TLS, pooling),
//! an HTTP/1.1 request/response engine built on top of it, and two
//! upgrade-based protocols (WebSocket, SSE) that borrow the same connector
//! and engine for their handshakes. [`Client`] ties all of it together
//! behind a single facade; every other module is usable on its own for
//! callers that want finer-grained control.
//!
//! ```no_run
//! use corvid_http::Client;
//! use url::Url;
//!
//! # async fn run() -> corvid_http::Result<()> {
//! let client = Client::new()?;
//! let url = Url::parse("https://example.com").expect("valid url");
//! let mut response = client.get(url).await?;
//! println!("{}", response.text(None).await?);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connect;
pub mod cookie;
pub mod dns;
pub mod error;
pub mod header;
pub mod http1;
pub mod pool;
pub mod proxy;
pub mod redirect;
pub mod request;
pub mod response;
pub mod sse;
pub mod stream;
pub mod timeout;
pub mod ws;

#[cfg(feature = "rustls-tls")]
pub mod tls;

pub use client::{Client, ClientBuilder, RequestBody, RequestOptions};
pub use cookie::CookieStore;
pub use error::{Error, Result};
pub use header::HeaderStore;
pub use http1::body::BodySource;
pub use pool::{PoolConfig, PoolKind};
pub use proxy::Proxy;
pub use request::Method;
pub use response::Response;
pub use sse::{SseEvent, SseOptions, SseSession};
pub use timeout::Timeouts;
pub use ws::{Message, MessageKind, ProtocolHandler, WsOptions, WsSession};

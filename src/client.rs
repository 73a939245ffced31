//! The facade: single entry points, argument normalization, cookie-jar hook
//! (`spec.md` §1 "external collaborator", §4.8 C12).
//!
//! Everything else in this crate works with explicit client instances only
//! (`spec.md` §9 "Global default client": no module-level `get`/`post`
//! singleton lives in the core — an embedder wanting that convenience
//! builds it on top of [`Client`]).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderValue;
use url::Url;

use crate::connect::Connector;
use crate::cookie::CookieStore;
use crate::dns::{GaiResolver, IntoResolve, Resolve};
use crate::error::{Error, Result};
use crate::header::HeaderStore;
use crate::http1::{self, body::BodySource, body::ByteStream, multipart::Multipart};
use crate::pool::PoolConfig;
use crate::proxy::Proxy;
use crate::redirect::{self, RedirectChain};
use crate::request::{self, Method, Request};
use crate::response::Response;
use crate::sse::{self, SseOptions, SseSession};
use crate::timeout::Timeouts;
use crate::ws::{self, WsOptions, WsSession};

#[cfg(feature = "rustls-tls")]
use crate::tls::RustlsConnector;

const DEFAULT_USER_AGENT: &str = concat!("corvid-http/", env!("CARGO_PKG_VERSION"));

/// One request's body, before it is lowered to a [`BodySource`]
/// (`spec.md` §6 `data`: "raw bytes, string (UTF-8), mapping ..., lazy byte
/// sequence (chunked), multipart composer").
pub enum RequestBody {
    Bytes(Bytes),
    Text(String),
    Form(Vec<(String, String)>),
    Stream(ByteStream),
    Multipart(Multipart),
}

/// Per-call request configuration (`spec.md` §4.8, §6 "Request API inputs").
pub struct RequestOptions {
    /// Query parameters appended to the URL, percent-encoded, duplicate
    /// keys repeated in insertion order.
    pub params: Vec<(String, String)>,
    /// The request body, if any. Ignored if `json` is also set.
    pub data: Option<RequestBody>,
    /// A JSON-serializable body; mutually exclusive with `data`, takes
    /// precedence if both are set.
    pub json: Option<serde_json::Value>,
    /// Extra headers merged with the base headers the H1 engine supplies.
    pub headers: HeaderStore,
    /// Per-request timeout overrides, merged over the client's defaults.
    pub timeouts: Timeouts,
    /// Whether to follow 3xx redirects (`spec.md` §4.5).
    pub follow: bool,
    /// Whether to retain `Authorization` across a cross-origin redirect.
    pub retain_authorization_cross_origin: bool,
    /// Whether to consult/update the client's cookie jar for this request.
    pub handle_cookies: bool,
    /// Requests the H2 engine adapter for this call. That adapter is out of
    /// scope for this crate (`spec.md` §1, §6), so setting this to `true`
    /// always fails fast with `Error::builder` rather than silently falling
    /// back to H1 — ALPN preference is a connection-wide setting configured
    /// once via `ClientBuilder::http2`, not a per-request one.
    pub http2: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            params: Vec::new(),
            data: None,
            json: None,
            headers: HeaderStore::new(),
            timeouts: Timeouts::none(),
            follow: true,
            retain_authorization_cross_origin: false,
            handle_cookies: false,
            http2: false,
        }
    }
}

/// Builds a [`Client`] (`spec.md` §4.8: owns the connector, the optional
/// cookie jar, and a handle counter used by `wait_requests()`).
pub struct ClientBuilder {
    resolver: Arc<dyn Resolve>,
    default_pool_config: PoolConfig,
    pool_overrides: Vec<(String, PoolConfig)>,
    proxy: Option<Proxy>,
    verify_ssl: bool,
    http2: bool,
    user_agent: String,
    default_timeouts: Timeouts,
    cookie_store: Option<Arc<dyn CookieStore>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder {
            resolver: GaiResolver::new().into_resolve(),
            default_pool_config: PoolConfig::new(),
            pool_overrides: Vec::new(),
            proxy: None,
            verify_ssl: true,
            http2: false,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            default_timeouts: Timeouts::none(),
            cookie_store: None,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the DNS resolver (e.g. [`crate::dns::HickoryResolver`]).
    pub fn resolver(mut self, resolver: impl IntoResolve) -> Self {
        self.resolver = resolver.into_resolve();
        self
    }

    /// Sets the default pool configuration used for any URL without a more
    /// specific registered prefix.
    pub fn default_pool_config(mut self, config: PoolConfig) -> Self {
        self.default_pool_config = config;
        self
    }

    /// Registers a per-URL-prefix pool configuration override (`spec.md` §4.2).
    pub fn register_pool_config(mut self, url_prefix: impl Into<String>, config: PoolConfig) -> Self {
        self.pool_overrides.push((url_prefix.into(), config));
        self
    }

    /// Routes every connection through an HTTP CONNECT proxy.
    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Disables TLS certificate verification for all requests. Never do
    /// this outside testing against a known endpoint.
    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    /// Advertises `h2,http/1.1` via ALPN instead of `http/1.1` alone. The
    /// HTTP/2 engine itself is an adapter outside this crate's scope
    /// (`spec.md` §1); this only affects the TLS handshake's ALPN offer.
    pub fn http2(mut self, enabled: bool) -> Self {
        self.http2 = enabled;
        self
    }

    /// Overrides the default `User-Agent` sent with every request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the default per-phase timeouts applied when a request doesn't
    /// override them.
    pub fn default_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.default_timeouts = timeouts;
        self
    }

    /// Plugs in a cookie jar, consulted/updated when a request sets
    /// `handle_cookies=true` (`spec.md` §4.8, §1 Non-goals: persistence is
    /// the embedder's concern).
    pub fn cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.cookie_store = Some(store);
        self
    }

    /// Builds the client.
    pub fn build(self) -> Result<Client> {
        let mut connector = Connector::new(self.resolver, self.default_pool_config);
        for (prefix, config) in self.pool_overrides {
            connector.register_pool_config(prefix, config);
        }
        if let Some(proxy) = self.proxy {
            connector.set_proxy(proxy);
        }
        connector.set_verify_ssl(self.verify_ssl);

        #[cfg(feature = "rustls-tls")]
        connector.set_tls(Arc::new(RustlsConnector::new(self.http2)));
        #[cfg(not(feature = "rustls-tls"))]
        let _ = self.http2;

        Ok(Client {
            connector: Arc::new(connector),
            user_agent: self.user_agent,
            default_timeouts: self.default_timeouts,
            cookie_store: self.cookie_store,
            outstanding: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(tokio::sync::Notify::new()),
        })
    }
}

/// Tracks one in-flight request for `Client::wait_requests` (`spec.md`
/// §4.2 "Shutdown": "`wait_requests` awaits outstanding leases to zero").
struct InFlightGuard {
    outstanding: Arc<AtomicUsize>,
    notify: Arc<tokio::sync::Notify>,
}

impl InFlightGuard {
    fn start(outstanding: &Arc<AtomicUsize>, notify: &Arc<tokio::sync::Notify>) -> Self {
        outstanding.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            outstanding: outstanding.clone(),
            notify: notify.clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// The top-level client: `request(method, url, ...)` plus sugar for common
/// methods, WebSocket/SSE session entry points, and a handle counter
/// (`spec.md` §4.8).
#[derive(Clone)]
pub struct Client {
    connector: Arc<Connector>,
    user_agent: String,
    default_timeouts: Timeouts,
    cookie_store: Option<Arc<dyn CookieStore>>,
    outstanding: Arc<AtomicUsize>,
    notify: Arc<tokio::sync::Notify>,
}

impl Client {
    /// Starts building a client with defaults.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// A client with every default (`rustls-tls` TLS, `GaiResolver`, no
    /// proxy, `size=25` Smart pools).
    pub fn new() -> Result<Self> {
        ClientBuilder::new().build()
    }

    /// The underlying connector, for pool diagnostics (`spec.md` §8
    /// scenario 1: "pool reports one connection created, three requests
    /// served").
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Issues one request, following redirects per `options.follow`
    /// (`spec.md` §4.5) and applying the cookie jar when
    /// `options.handle_cookies` is set.
    ///
    /// A streamed or multipart body can only be sent once; if a redirect
    /// response follows a request carrying one, this fails rather than
    /// silently dropping the body on the retried hop (`spec.md` §4.4/§4.5
    /// don't specify this combination, so the safer failure is chosen).
    pub async fn request(&self, method: Method, mut url: Url, options: RequestOptions) -> Result<Response> {
        if options.http2 {
            return Err(Error::builder(
                "the http2 adapter is out of scope for this engine; configure ALPN via ClientBuilder::http2 instead",
            ));
        }
        let _guard = InFlightGuard::start(&self.outstanding, &self.notify);

        request::append_query_params(&mut url, &options.params);
        let timeouts = self.default_timeouts.overridden_by(options.timeouts);
        let follow = options.follow;
        let retain_auth = options.retain_authorization_cross_origin;
        let handle_cookies = options.handle_cookies;

        let mut req = Request::new(method, url.clone());
        req.headers_mut().merge(&options.headers);
        apply_body(&mut req, options.data, options.json)?;

        if handle_cookies {
            if let Some(store) = &self.cookie_store {
                if let Some(cookie) = store.cookies_for_url(&url) {
                    req.headers_mut().insert(http::header::COOKIE, cookie);
                }
            }
        }

        let mut chain = RedirectChain::new(url);
        loop {
            let body = take_or_clone_body(&mut req);
            let body_was_moved = matches!(body, BodySource::Stream(_) | BodySource::Multipart(_));
            let to_send = build_send_request(&req, body);

            let exchange = http1::execute(&self.connector, to_send, &timeouts, &self.user_agent).await?;
            let status = exchange.head.status;
            let location = exchange
                .head
                .headers
                .get(&http::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            if handle_cookies {
                if let Some(store) = &self.cookie_store {
                    let set_cookies: Vec<HeaderValue> =
                        exchange.head.headers.get_all(&http::header::SET_COOKIE).cloned().collect();
                    if !set_cookies.is_empty() {
                        store.store_response_cookies(
                            chain.visited().last().expect("chain always has an entry"),
                            &set_cookies,
                        );
                    }
                }
            }

            if follow && redirect::is_redirect_status(status) {
                if let Some(location) = location {
                    if body_was_moved {
                        return Err(Error::builder(
                            "cannot follow a redirect after sending a streamed or multipart body",
                        ));
                    }
                    let next = redirect::apply_redirect(&mut req, status, &location, retain_auth)?;
                    chain.record(next)?;
                    // Drain and discard the redirect body; its connection
                    // is released back to its pool once exhausted.
                    let mut body = exchange.body;
                    while body.next().await?.is_some() {}
                    continue;
                }
            }

            return Ok(Response::new(status, exchange.head.headers, req.url().clone(), exchange.body));
        }
    }

    /// A `GET` request with default options.
    pub async fn get(&self, url: Url) -> Result<Response> {
        self.request(Method::Get, url, RequestOptions::default()).await
    }

    /// A `POST` request.
    pub async fn post(&self, url: Url, options: RequestOptions) -> Result<Response> {
        self.request(Method::Post, url, options).await
    }

    /// A `PUT` request.
    pub async fn put(&self, url: Url, options: RequestOptions) -> Result<Response> {
        self.request(Method::Put, url, options).await
    }

    /// A `PATCH` request.
    pub async fn patch(&self, url: Url, options: RequestOptions) -> Result<Response> {
        self.request(Method::Patch, url, options).await
    }

    /// A `DELETE` request.
    pub async fn delete(&self, url: Url, options: RequestOptions) -> Result<Response> {
        self.request(Method::Delete, url, options).await
    }

    /// A `HEAD` request with default options.
    pub async fn head(&self, url: Url) -> Result<Response> {
        self.request(Method::Head, url, RequestOptions::default()).await
    }

    /// An `OPTIONS` request with default options.
    pub async fn options(&self, url: Url) -> Result<Response> {
        self.request(Method::Options, url, RequestOptions::default()).await
    }

    /// Opens a WebSocket session against `url` (`ws://`/`wss://`).
    pub async fn connect_ws(&self, url: Url, options: WsOptions) -> Result<WsSession> {
        let _guard = InFlightGuard::start(&self.outstanding, &self.notify);
        ws::connect(
            &self.connector,
            url,
            &options,
            &HeaderStore::new(),
            &self.default_timeouts,
            &self.user_agent,
        )
        .await
    }

    /// Opens an SSE session against `url`.
    pub async fn connect_sse(&self, url: Url, options: SseOptions) -> Result<SseSession> {
        let _guard = InFlightGuard::start(&self.outstanding, &self.notify);
        sse::connect(
            self.connector.clone(),
            url,
            options,
            self.default_timeouts,
            self.user_agent.clone(),
        )
        .await
    }

    /// Awaits every currently in-flight request/session handshake
    /// completing, for graceful shutdown (`spec.md` §4.2 Shutdown).
    pub async fn wait_requests(&self) {
        loop {
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.notify.notified();
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Lowers `data`/`json` onto `req`, setting the matching `Content-Type`
/// when one isn't implied by the source itself (`spec.md` §6).
fn apply_body(req: &mut Request, data: Option<RequestBody>, json: Option<serde_json::Value>) -> Result<()> {
    if let Some(json) = json {
        let bytes = request::json_body(&json)?;
        req.headers_mut()
            .insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        req.set_body(BodySource::Bytes(bytes));
        return Ok(());
    }

    match data {
        None => {}
        Some(RequestBody::Bytes(b)) => req.set_body(BodySource::Bytes(b)),
        Some(RequestBody::Text(s)) => req.set_body(BodySource::Bytes(Bytes::from(s))),
        Some(RequestBody::Form(pairs)) => {
            let bytes = request::form_urlencoded_body(&pairs)?;
            req.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
            req.set_body(BodySource::Bytes(bytes));
        }
        Some(RequestBody::Stream(stream)) => req.set_body(BodySource::Stream(stream)),
        Some(RequestBody::Multipart(multipart)) => {
            let content_type = HeaderValue::from_str(&multipart.content_type()).map_err(Error::builder)?;
            req.headers_mut().insert(http::header::CONTENT_TYPE, content_type);
            req.set_body(BodySource::Multipart(multipart));
        }
    }
    Ok(())
}

/// Takes `req`'s body out, cloning it back in when it's cheaply replayable
/// (`None`/`Bytes`) so the redirect loop can keep mutating `req` while a
/// send-only copy goes to `execute`. A `Stream`/`Multipart` body is moved
/// out entirely since it can only be consumed once.
fn take_or_clone_body(req: &mut Request) -> BodySource {
    match std::mem::replace(&mut req.body, BodySource::None) {
        BodySource::None => BodySource::None,
        BodySource::Bytes(b) => {
            req.body = BodySource::Bytes(b.clone());
            BodySource::Bytes(b)
        }
        other => other,
    }
}

fn build_send_request(req: &Request, body: BodySource) -> Request {
    let mut to_send = Request::new(req.method(), req.url().clone());
    to_send.headers_mut().merge(req.headers());
    to_send.set_body(body);
    to_send
}

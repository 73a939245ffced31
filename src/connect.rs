//! The connector: maps a target origin to a pool configuration, a pool,
//! and ultimately a live connection (`spec.md` §4.2, §4.3).

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::dns::{Cache, Family, IntoResolve, Name, Resolve};
use crate::error::{Error, Result, TimeoutPhase};
use crate::pool::{
    Acquired, Connection, ConnectionKey, Origin, Pool, PoolConfig, PoolKind, PoolStats, Scheme,
};
use crate::pool::{CyclicPool, SmartPool};
use crate::proxy::Proxy;
use crate::stream::{BoxStream, TlsConnect};
use crate::timeout::{DeadlineClock, Timeouts};

type BucketKey = (Scheme, String, u16, Option<Origin>);

/// A leased connection plus enough context to release it back to its pool
/// (or discard it) when the exchange is done.
///
/// Dropping a `Lease` without calling [`Lease::release`] or
/// [`Lease::discard`] discards the connection and frees its pool slot —
/// the "explicit scope" design from `spec.md` §9: nothing is returned to
/// the pool on a bare drop.
pub struct Lease {
    pool: Arc<dyn Pool>,
    connection: Option<Connection>,
    done: bool,
}

impl Lease {
    /// The leased connection.
    pub fn connection(&self) -> &Connection {
        self.connection.as_ref().expect("connection already taken")
    }

    /// Mutable access to the leased connection.
    pub fn connection_mut(&mut self) -> &mut Connection {
        self.connection.as_mut().expect("connection already taken")
    }

    /// Records that one request/response exchange completed on this
    /// connection, for `spec.md` §8 scenario 1's "N requests served" stat.
    pub fn mark_request_served(&self) {
        self.pool.record_request();
    }

    /// Finishes the lease, returning the connection to its pool if it is
    /// still reusable (`spec.md` §4.2 Release).
    pub fn release(mut self) {
        let conn = self.connection.take();
        self.pool.release(conn);
        self.done = true;
    }

    /// Finishes the lease, discarding the connection outright (used after
    /// a transport error, or when the caller detaches the connection for
    /// a WS/SSE session).
    pub fn discard(mut self) {
        self.connection.take();
        self.pool.release(None);
        self.done = true;
    }

    /// Detaches the connection from pool bookkeeping entirely without
    /// closing it — used when a WebSocket/SSE session takes ownership
    /// (`spec.md` §2: "the connection is detached from the pool").
    pub fn detach(mut self) -> Connection {
        let conn = self.connection.take().expect("connection already taken");
        self.pool.release(None);
        self.done = true;
        conn
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.done {
            if let Some(mut conn) = self.connection.take() {
                conn.close();
            }
            self.pool.release(None);
        }
    }
}

/// Maps target origins to pool configuration, manages a pool per bucket,
/// and dials fresh connections (DNS, TCP, optional CONNECT tunnel, optional
/// TLS) when a pool has nothing reusable.
pub struct Connector {
    dns: Arc<Cache<Arc<dyn Resolve>>>,
    pools: Mutex<HashMap<BucketKey, Arc<dyn Pool>>>,
    // Longest-prefix-match configuration table; ties broken by insertion
    // order (`spec.md` §4.2).
    pool_configs: Vec<(String, PoolConfig)>,
    default_pool_config: PoolConfig,
    proxy: Option<Proxy>,
    tls: Option<Arc<dyn TlsConnect>>,
    verify_ssl: bool,
}

impl Connector {
    /// Builds a connector with the given default pool config and resolver.
    pub fn new(resolver: impl IntoResolve, default_pool_config: PoolConfig) -> Self {
        Connector {
            dns: Arc::new(Cache::new(resolver.into_resolve())),
            pools: Mutex::new(HashMap::new()),
            pool_configs: Vec::new(),
            default_pool_config,
            proxy: None,
            tls: None,
            verify_ssl: true,
        }
    }

    /// Registers a per-prefix pool configuration override.
    pub fn register_pool_config(&mut self, url_prefix: impl Into<String>, config: PoolConfig) {
        self.pool_configs.push((url_prefix.into(), config));
    }

    /// Sets the HTTP CONNECT proxy every connection is routed through.
    pub fn set_proxy(&mut self, proxy: Proxy) {
        self.proxy = Some(proxy);
    }

    /// Plugs in a TLS capability (e.g. [`crate::tls::RustlsConnector`]).
    pub fn set_tls(&mut self, tls: Arc<dyn TlsConnect>) {
        self.tls = Some(tls);
    }

    /// Disables certificate verification for subsequent TLS connections.
    pub fn set_verify_ssl(&mut self, verify: bool) {
        self.verify_ssl = verify;
    }

    /// Resolves the [`PoolConfig`] that applies to `url`: the longest
    /// matching registered prefix, or the `:default` entry, ties broken by
    /// insertion order (`spec.md` §4.2).
    pub fn resolve_pool_config(&self, url: &str) -> PoolConfig {
        let mut best: Option<&(String, PoolConfig)> = None;
        for entry in self.pool_configs.iter().filter(|(prefix, _)| url.starts_with(prefix.as_str())) {
            // Strict `>` so the first-inserted entry wins a length tie,
            // matching insertion-order tiebreak (`spec.md` §4.2).
            if best.map(|(p, _)| entry.0.len() > p.len()).unwrap_or(true) {
                best = Some(entry);
            }
        }
        best.map(|(_, cfg)| *cfg).unwrap_or(self.default_pool_config)
    }

    /// Snapshots the pool stats for whichever bucket `origin` maps to, if
    /// that bucket has been dialed into at least once (`spec.md` §8
    /// scenario 1: "pool reports one connection created, three requests
    /// served"). Returns `None` before the first `acquire` for this origin.
    pub fn pool_stats(&self, origin: Origin) -> Option<PoolStats> {
        let key = match &self.proxy {
            Some(proxy) => ConnectionKey::via_proxy(origin, proxy.origin().clone()),
            None => ConnectionKey::direct(origin),
        };
        let pools = self.pools.lock().expect("connector poisoned");
        pools.get(&key.bucket()).map(|pool| pool.stats())
    }

    fn pool_for(&self, key: &ConnectionKey, url: &str) -> Arc<dyn Pool> {
        let bucket = key.bucket();
        let mut pools = self.pools.lock().expect("connector poisoned");
        pools
            .entry(bucket)
            .or_insert_with(|| {
                let config = self.resolve_pool_config(url);
                match config.kind {
                    PoolKind::Smart => Arc::new(SmartPool::new(config)) as Arc<dyn Pool>,
                    PoolKind::Cyclic => Arc::new(CyclicPool::new(config)) as Arc<dyn Pool>,
                }
            })
            .clone()
    }

    /// Acquires a connection for `origin`, reusing an idle one from its
    /// pool or dialing a fresh one (`spec.md` §4.2 Acquire).
    pub async fn acquire(
        &self,
        origin: Origin,
        url: &str,
        timeouts: &Timeouts,
        clock: &DeadlineClock,
    ) -> Result<Lease> {
        let key = match &self.proxy {
            Some(proxy) => ConnectionKey::via_proxy(origin.clone(), proxy.origin().clone()),
            None => ConnectionKey::direct(origin.clone()),
        };
        let pool = self.pool_for(&key, url);

        let acquired = clock
            .run(
                TimeoutPhase::PoolAcquire,
                timeouts.pool_acquire,
                pool.acquire(timeouts.pool_acquire),
            )
            .await??;

        match acquired {
            Acquired::Reused(conn) => {
                log::trace!("reusing pooled connection to {}", key.origin());
                Ok(Lease {
                    pool,
                    connection: Some(conn),
                    done: false,
                })
            }
            Acquired::NeedsDial => {
                match self.dial(&key, timeouts, clock).await {
                    Ok(conn) => {
                        pool.record_created();
                        Ok(Lease {
                            pool,
                            connection: Some(conn),
                            done: false,
                        })
                    }
                    Err(e) => {
                        pool.release(None);
                        Err(e)
                    }
                }
            }
        }
    }

    async fn dial(&self, key: &ConnectionKey, timeouts: &Timeouts, clock: &DeadlineClock) -> Result<Connection> {
        let target = key.proxy().unwrap_or(key.origin());

        let addrs = clock
            .run(TimeoutPhase::Connect, timeouts.sock_connect, self.dns.resolve(
                Name::new(target.host()),
                Family::Unspecified,
            ))
            .await??;

        let tcp = clock
            .run(TimeoutPhase::Connect, timeouts.sock_connect, connect_any(&addrs, target.port()))
            .await??;

        let stream = if key.proxy().is_some() && key.origin().scheme().is_secure() {
            // https/wss via a proxy: CONNECT-tunnel, then start TLS inside
            // the tunnel (`spec.md` §4.2).
            let tunneled = tunnel_connect(tcp, key.origin(), self.proxy.as_ref()).await?;
            self.maybe_tls(key.origin(), tunneled).await?
        } else if key.proxy().is_some() {
            // http/ws via a proxy: no CONNECT tunnel, the H1 engine instead
            // emits an absolute-URI request line directly to the proxy.
            BoxStream::new(tcp)
        } else {
            self.maybe_tls(key.origin(), BoxStream::new(tcp)).await?
        };

        log::debug!("dialed new connection to {}", key.origin());
        Ok(Connection::new(key.clone(), stream))
    }

    async fn maybe_tls(&self, origin: &Origin, stream: BoxStream) -> Result<BoxStream> {
        if !origin.scheme().is_secure() {
            return Ok(stream);
        }
        let tls = self
            .tls
            .as_ref()
            .ok_or_else(|| Error::builder("https/wss scheme requires a TLS capability, but none was configured"))?;
        tls.connect(origin.host(), stream, self.verify_ssl).await
    }
}

async fn connect_any(addrs: &[std::net::IpAddr], port: u16) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        let sock = SocketAddr::new(*addr, port);
        match TcpStream::connect(sock).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(Error::connect_failed(
        last_err.unwrap_or_else(|| std::io::Error::other("no addresses to try")),
    ))
}

async fn tunnel_connect(mut tcp: TcpStream, target: &Origin, proxy: Option<&Proxy>) -> Result<BoxStream> {
    let host_port = format!("{}:{}", target.host(), target.port());
    let mut request = format!("CONNECT {host_port} HTTP/1.1\r\nHost: {host_port}\r\n");
    if let Some(auth) = proxy.and_then(|p| p.authorization_header()) {
        request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
    }
    request.push_str("\r\n");

    tcp.write_all(request.as_bytes())
        .await
        .map_err(Error::connect_failed)?;

    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let n = tcp.read(&mut chunk).await.map_err(Error::connect_failed)?;
        if n == 0 {
            return Err(Error::connect_failed(std::io::Error::other(
                "proxy closed connection during CONNECT",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > 64 * 1024 {
            return Err(Error::http_parse("CONNECT response headers too large"));
        }
    }

    let status_line_end = buf.iter().position(|&b| b == b'\n').unwrap_or(buf.len());
    let status_line = String::from_utf8_lossy(&buf[..status_line_end]);
    let mut parts = status_line.split_whitespace();
    let _version = parts.next();
    let code = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| Error::http_parse("malformed CONNECT status line"))?;
    if !(200..300).contains(&code) {
        return Err(Error::connect_failed(std::io::Error::other(format!(
            "proxy CONNECT failed with status {code}"
        ))));
    }

    // Any bytes after the CRLFCRLF delimiter belong to the tunneled
    // stream's first response and must be replayed to the reader.
    let delim = find_header_end(&buf).expect("checked above");
    let leftover = buf[delim..].to_vec();
    Ok(BoxStream::new(PrefixedStream::new(leftover, tcp)))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Replays bytes read ahead of the proper stream (e.g. during the CONNECT
/// handshake) before resuming normal reads.
struct PrefixedStream {
    prefix: std::io::Cursor<Vec<u8>>,
    inner: TcpStream,
}

impl PrefixedStream {
    fn new(prefix: Vec<u8>, inner: TcpStream) -> Self {
        PrefixedStream {
            prefix: std::io::Cursor::new(prefix),
            inner,
        }
    }
}

impl tokio::io::AsyncRead for PrefixedStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if (this.prefix.position() as usize) < this.prefix.get_ref().len() {
            use std::io::Read;
            let mut tmp = vec![0u8; buf.remaining()];
            let n = this.prefix.read(&mut tmp).unwrap_or(0);
            buf.put_slice(&tmp[..n]);
            return std::task::Poll::Ready(Ok(()));
        }
        std::pin::Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for PrefixedStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }
    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }
    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins_with_insertion_tiebreak() {
        let mut connector = Connector::new(crate::dns::GaiResolver::new(), PoolConfig::new());
        connector.register_pool_config("https://api.example.com", PoolConfig::new().size(5));
        connector.register_pool_config("https://api.example.com/v2", PoolConfig::new().size(9));
        let cfg = connector.resolve_pool_config("https://api.example.com/v2/users");
        assert_eq!(cfg.size, 9);
        let cfg = connector.resolve_pool_config("https://api.example.com/v1/users");
        assert_eq!(cfg.size, 5);
        let cfg = connector.resolve_pool_config("https://other.example.com");
        assert_eq!(cfg.size, PoolConfig::new().size);
    }

    #[test]
    fn duplicate_prefix_registration_keeps_first_insertion() {
        // Two registrations matching the same URL can only tie in prefix
        // length if they're the identical string; the first one registered
        // should win (`spec.md` §4.2 insertion-order tiebreak).
        let mut connector = Connector::new(crate::dns::GaiResolver::new(), PoolConfig::new());
        connector.register_pool_config("https://api.example.com", PoolConfig::new().size(1));
        connector.register_pool_config("https://api.example.com", PoolConfig::new().size(2));
        let cfg = connector.resolve_pool_config("https://api.example.com/users");
        assert_eq!(cfg.size, 1);
    }
}

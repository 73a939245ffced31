//! Origin and connection-key types (`spec.md` §3).

use std::fmt;

/// The URL scheme an [`Origin`] was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
    /// Plain WebSocket (reuses the `http` pool, per `spec.md` §3).
    Ws,
    /// WebSocket over TLS (reuses the `https` pool).
    Wss,
}

impl Scheme {
    /// Parses a URL scheme string, returning `None` for anything else.
    pub fn parse(s: &str) -> Option<Scheme> {
        match s {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            _ => None,
        }
    }

    /// True if this scheme requires a TLS connection.
    pub fn is_secure(self) -> bool {
        matches!(self, Scheme::Https | Scheme::Wss)
    }

    /// Default TCP port for this scheme.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http | Scheme::Ws => 80,
            Scheme::Https | Scheme::Wss => 443,
        }
    }

    /// The pool-bucket this scheme reuses: `ws`/`wss` key into the same
    /// bucket as `http`/`https`, per `spec.md` §3 ("`ws`/`wss` reuse the
    /// corresponding http pool").
    fn pool_bucket(self) -> Scheme {
        match self {
            Scheme::Http | Scheme::Ws => Scheme::Http,
            Scheme::Https | Scheme::Wss => Scheme::Https,
        }
    }
}

/// `(scheme, host, port)` — the tuple pools are keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Origin {
    /// Builds an origin, substituting the scheme's default port when `port` is `None`.
    pub fn new(scheme: Scheme, host: impl Into<String>, port: Option<u16>) -> Self {
        Origin {
            scheme,
            host: host.into(),
            port: port.unwrap_or_else(|| scheme.default_port()),
        }
    }

    /// Parses an origin out of a [`url::Url`].
    pub fn from_url(url: &url::Url) -> Option<Origin> {
        let scheme = Scheme::parse(url.scheme())?;
        let host = url.host_str()?.to_owned();
        Some(Origin::new(scheme, host, url.port()))
    }

    /// The origin's scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The origin's host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The origin's port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The pool bucket key: `(Http|Https bucket, host, port)`.
    pub fn pool_bucket(&self) -> (Scheme, &str, u16) {
        (self.scheme.pool_bucket(), &self.host, self.port)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// An [`Origin`] plus the optional proxy it is reached through — the full
/// key a [`super::Pool`] indexes connections by (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    origin: Origin,
    proxy: Option<Origin>,
}

impl ConnectionKey {
    /// Builds a key for a direct (non-proxied) connection.
    pub fn direct(origin: Origin) -> Self {
        ConnectionKey { origin, proxy: None }
    }

    /// Builds a key for a connection reached through `proxy`.
    pub fn via_proxy(origin: Origin, proxy: Origin) -> Self {
        ConnectionKey {
            origin,
            proxy: Some(proxy),
        }
    }

    /// The target origin.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// The proxy origin, if this connection tunnels through one.
    pub fn proxy(&self) -> Option<&Origin> {
        self.proxy.as_ref()
    }

    /// True when requests on this connection must use the absolute-URI
    /// request-target form because they are sent directly to a plain-HTTP
    /// proxy rather than tunneled (`spec.md` §4.2/§4.4).
    pub fn uses_proxy_absolute_form(&self) -> bool {
        self.proxy.is_some() && !self.origin.scheme().is_secure()
    }

    /// The bucket this key maps into: same-origin requests through
    /// different proxies are still pooled separately.
    pub fn bucket(&self) -> (Scheme, String, u16, Option<Origin>) {
        let (scheme, host, port) = self.origin.pool_bucket();
        (scheme, host.to_owned(), port, self.proxy.clone())
    }
}

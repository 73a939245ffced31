//! HTTP CONNECT proxy configuration (`spec.md` §4.2 "Proxies").

use base64::Engine;

use crate::pool::Origin;

/// An HTTP proxy the [`crate::connect::Connector`] may route connections
/// through.
#[derive(Debug, Clone)]
pub struct Proxy {
    origin: Origin,
    auth: Option<String>,
}

impl Proxy {
    /// Builds a proxy without credentials.
    pub fn new(origin: Origin) -> Self {
        Proxy { origin, auth: None }
    }

    /// Attaches `user:pass` Basic credentials, encoded into the
    /// `Proxy-Authorization` header at connect time (`spec.md` §4.2).
    pub fn with_basic_auth(mut self, user: &str, pass: &str) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        self.auth = Some(format!("Basic {encoded}"));
        self
    }

    /// The proxy's own origin (where the TCP connection is actually made).
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// The `Proxy-Authorization` header value, if credentials were configured.
    pub fn authorization_header(&self) -> Option<&str> {
        self.auth.as_deref()
    }
}

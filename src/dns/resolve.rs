//! The [`Resolve`] capability trait and its default `getaddrinfo`-backed implementation.

use std::{
    fmt,
    future::Future,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::Arc,
};

use crate::error::BoxError;

/// A host name to resolve into one or more addresses.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name {
    host: Box<str>,
}

impl Name {
    /// Creates a new [`Name`] from a host string (no port).
    pub fn new(host: impl Into<Box<str>>) -> Name {
        Name { host: host.into() }
    }

    /// The host as a string slice.
    pub fn as_str(&self) -> &str {
        &self.host
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

/// Address family filter for a resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// No filter: return whatever addresses the resolver finds (dual-stack).
    Unspecified,
    /// Only IPv4.
    V4,
    /// Only IPv6.
    V6,
}

/// Boxed iterator over resolved addresses.
pub type Addrs = Box<dyn Iterator<Item = IpAddr> + Send>;

/// Boxed future returned by [`Resolve::resolve`].
pub type Resolving = Pin<Box<dyn Future<Output = Result<Addrs, BoxError>> + Send>>;

/// A capability for turning a host name into a list of addresses.
///
/// This is an interface only — `spec.md` §1 explicitly excludes a full
/// resolver implementation from scope, save for caching (see
/// [`super::cache`]) and a reasonable default ([`GaiResolver`]).
pub trait Resolve: Send + Sync {
    /// Resolves `name` for the given address `family`.
    fn resolve(&self, name: Name, family: Family) -> Resolving;
}

/// Converts a concrete resolver into a shared, type-erased [`Resolve`].
pub trait IntoResolve {
    /// Performs the conversion.
    fn into_resolve(self) -> Arc<dyn Resolve>;
}

impl IntoResolve for Arc<dyn Resolve> {
    fn into_resolve(self) -> Arc<dyn Resolve> {
        self
    }
}

impl Resolve for Arc<dyn Resolve> {
    fn resolve(&self, name: Name, family: Family) -> Resolving {
        (**self).resolve(name, family)
    }
}

impl<R> IntoResolve for R
where
    R: Resolve + 'static,
{
    fn into_resolve(self) -> Arc<dyn Resolve> {
        Arc::new(self)
    }
}

/// The default resolver: delegates to the OS stub resolver via
/// [`tokio::net::lookup_host`], which in turn uses `getaddrinfo(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GaiResolver;

impl GaiResolver {
    /// Creates a new `GaiResolver`.
    pub fn new() -> Self {
        GaiResolver
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name, family: Family) -> Resolving {
        Box::pin(async move {
            // Port is irrelevant to the resolution itself; 0 is a valid
            // placeholder recognized by `lookup_host`.
            let target = format!("{}:0", name.as_str());
            let addrs = tokio::net::lookup_host(target)
                .await
                .map_err(|e| Box::new(e) as BoxError)?
                .map(|sock: SocketAddr| sock.ip())
                .filter(move |ip| match family {
                    Family::Unspecified => true,
                    Family::V4 => ip.is_ipv4(),
                    Family::V6 => ip.is_ipv6(),
                })
                .collect::<Vec<_>>();
            if addrs.is_empty() {
                return Err(Box::<dyn std::error::Error + Send + Sync>::from(
                    "no addresses returned",
                ));
            }
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

//! TTL-bounded DNS resolution cache, keyed by (host, family).

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Mutex,
    time::{Duration, Instant},
};

use super::resolve::{Family, Name, Resolve};
use crate::error::Error;

const DEFAULT_TTL: Duration = Duration::from_secs(10);

struct Entry {
    addrs: Vec<IpAddr>,
    resolved_at: Instant,
}

/// Wraps a [`Resolve`] with a TTL cache keyed by `(host, family)`.
///
/// Entries older than `ttl` (default 10s, per `spec.md` §4.1) are discarded
/// on read rather than proactively evicted. Writes are idempotent:
/// concurrent resolutions of the same key racing each other is fine,
/// last-writer-wins (`spec.md` §5).
pub struct Cache<R> {
    inner: R,
    ttl: Duration,
    entries: Mutex<HashMap<(Box<str>, Family), Entry>>,
}

impl<R: Resolve> Cache<R> {
    /// Wraps `resolver` with the default 10-second TTL.
    pub fn new(resolver: R) -> Self {
        Self::with_ttl(resolver, DEFAULT_TTL)
    }

    /// Wraps `resolver` with an explicit TTL.
    pub fn with_ttl(resolver: R, ttl: Duration) -> Self {
        Self {
            inner: resolver,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `name`, bypassing both cache and resolver for IP literals
    /// and loopback addresses per `spec.md` §4.1.
    pub async fn resolve(&self, name: Name, family: Family) -> Result<Vec<IpAddr>, Error> {
        if let Ok(ip) = name.as_str().parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        if is_loopback_literal(name.as_str()) {
            let ip: IpAddr = if name.as_str().starts_with("127.") {
                name.as_str().parse().unwrap_or([127, 0, 0, 1].into())
            } else {
                std::net::Ipv6Addr::LOCALHOST.into()
            };
            return Ok(vec![ip]);
        }

        let key = (Box::<str>::from(name.as_str()), family);
        if let Some(addrs) = self.fresh_entry(&key) {
            return Ok(addrs);
        }

        let addrs: Vec<IpAddr> = self
            .inner
            .resolve(name.clone(), family)
            .await
            .map_err(|e| Error::dns_failed(name.as_str(), e))?
            .collect();

        let mut guard = self.entries.lock().expect("dns cache poisoned");
        guard.insert(
            key,
            Entry {
                addrs: addrs.clone(),
                resolved_at: Instant::now(),
            },
        );
        Ok(addrs)
    }

    fn fresh_entry(&self, key: &(Box<str>, Family)) -> Option<Vec<IpAddr>> {
        let guard = self.entries.lock().expect("dns cache poisoned");
        let entry = guard.get(key)?;
        if entry.resolved_at.elapsed() <= self.ttl {
            Some(entry.addrs.clone())
        } else {
            None
        }
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.entries.lock().expect("dns cache poisoned").clear();
    }
}

fn is_loopback_literal(host: &str) -> bool {
    host.starts_with("127.") || host == "::1" || host == "localhost"
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dns::resolve::Resolving;

    struct CountingResolver {
        calls: AtomicUsize,
        addr: IpAddr,
    }

    impl Resolve for CountingResolver {
        fn resolve(&self, _name: Name, _family: Family) -> Resolving {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let addr = self.addr;
            Box::pin(async move { Ok(Box::new(std::iter::once(addr)) as _) })
        }
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
            addr: "10.0.0.1".parse().unwrap(),
        };
        let cache = Cache::with_ttl(resolver, Duration::from_secs(60));
        cache.resolve(Name::new("example.com"), Family::Unspecified).await.unwrap();
        cache.resolve(Name::new("example.com"), Family::Unspecified).await.unwrap();
        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
            addr: "10.0.0.1".parse().unwrap(),
        };
        let cache = Cache::with_ttl(resolver, Duration::from_millis(1));
        cache.resolve(Name::new("example.com"), Family::Unspecified).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.resolve(Name::new("example.com"), Family::Unspecified).await.unwrap();
        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ip_literal_bypasses_resolver() {
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
            addr: "10.0.0.1".parse().unwrap(),
        };
        let cache = Cache::new(resolver);
        let addrs = cache.resolve(Name::new("127.0.0.1"), Family::Unspecified).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 0);
    }
}

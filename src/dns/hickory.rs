//! An optional [`Resolve`] backed by `hickory-resolver`, mirroring the
//! teacher's `hickory-dns` optional feature group.

use hickory_resolver::{TokioAsyncResolver, config::{ResolverConfig, ResolverOpts}};

use super::resolve::{Addrs, Family, Name, Resolve, Resolving};
use crate::error::BoxError;

/// A [`Resolve`] implementation backed by `hickory-resolver`'s async,
/// pure-Rust DNS client, for environments where the OS stub resolver is
/// undesirable (containers without `nsswitch`, custom DoT/DoH upstreams).
#[derive(Clone)]
pub struct HickoryResolver {
    inner: std::sync::Arc<TokioAsyncResolver>,
}

impl HickoryResolver {
    /// Builds a resolver from the system configuration (`/etc/resolv.conf`
    /// on unix), falling back to `ResolverConfig::default()`.
    pub fn from_system_conf() -> Result<Self, BoxError> {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Ok(Self {
            inner: std::sync::Arc::new(resolver),
        })
    }
}

impl Resolve for HickoryResolver {
    fn resolve(&self, name: Name, family: Family) -> Resolving {
        let resolver = self.inner.clone();
        Box::pin(async move {
            let response = resolver
                .lookup_ip(name.as_str())
                .await
                .map_err(|e| Box::new(e) as BoxError)?;
            let addrs: Vec<_> = response
                .iter()
                .filter(|ip| match family {
                    Family::Unspecified => true,
                    Family::V4 => ip.is_ipv4(),
                    Family::V6 => ip.is_ipv6(),
                })
                .collect();
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

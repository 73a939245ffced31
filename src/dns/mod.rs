//! DNS resolution: a capability interface ([`Resolve`]) plus a TTL cache
//! ([`Cache`]) in front of it. No resolver implementation beyond the
//! OS-backed default is in scope (`spec.md` §1 Non-goals).

mod cache;
mod resolve;

#[cfg(feature = "hickory-dns")]
mod hickory;

pub use cache::Cache;
pub use resolve::{Addrs, Family, GaiResolver, IntoResolve, Name, Resolve, Resolving};

#[cfg(feature = "hickory-dns")]
pub use hickory::HickoryResolver;

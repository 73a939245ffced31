//! Connection pooling (`spec.md` §3, §4.2, §8 "pool conservation").

mod config;
mod connection;
mod cyclic;
mod origin;
mod smart;

pub use config::{PoolConfig, PoolKind};
pub use connection::Connection;
pub use cyclic::CyclicPool;
pub use origin::{ConnectionKey, Origin, Scheme};
pub use smart::SmartPool;

use std::time::Duration;

use crate::error::{Error, Result};

/// Point-in-time pool occupancy, exposed for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections ever opened by this pool.
    pub connections_created: u64,
    /// Requests ever served across all connections in this pool.
    pub requests_served: u64,
    /// Connections currently sitting idle.
    pub idle: usize,
    /// Connections currently leased to an in-flight request.
    pub leased: usize,
}

/// What [`Pool::acquire`] handed back.
pub enum Acquired {
    /// A still-reusable idle connection was found; no dial is needed.
    Reused(Connection),
    /// No idle connection qualified; the caller must dial a fresh one and
    /// hand it to [`Pool::release`] (or drop the permit) when done. The
    /// permit is implicit: `acquire` already reserved the slot.
    NeedsDial,
}

/// The capability interface both [`SmartPool`] and [`CyclicPool`] implement.
///
/// A `Pool` only manages *slots* and *idle reuse*; dialing a fresh
/// connection is the [`crate::connect::Connector`]'s job (it alone knows
/// DNS, proxying, and TLS). This mirrors `spec.md` §4.2's acquire
/// algorithm: wait on the slot semaphore, then either reuse or signal the
/// caller to dial.
#[async_trait::async_trait]
pub trait Pool: Send + Sync {
    /// Waits up to `acquire_timeout` for a free slot, then returns either a
    /// reusable idle connection or `NeedsDial` (slot reserved either way).
    async fn acquire(&self, acquire_timeout: Option<Duration>) -> Result<Acquired>;

    /// Releases a slot previously returned by `acquire`. `conn: Some(_)`
    /// means the exchange finished and the connection may be considered
    /// for reuse (subject to the reuse conditions); `conn: None` means the
    /// caller is discarding the connection (failed dial, forced close).
    fn release(&self, conn: Option<Connection>);

    /// Current occupancy snapshot.
    fn stats(&self) -> PoolStats;

    /// Closes every idle connection; leased connections are closed on
    /// their next `release` rather than forcibly interrupted
    /// (`spec.md` §4.2 Shutdown).
    async fn drain(&self);

    /// The configuration this pool was built with.
    fn config(&self) -> &PoolConfig;

    /// Records that the [`crate::connect::Connector`] dialed a brand new
    /// connection for this bucket. Call once per successful dial.
    fn record_created(&self);

    /// Records that one request/response exchange completed on a
    /// connection from this pool. Call once per completed exchange.
    fn record_request(&self);
}

/// True if `conn` still satisfies the reuse conditions in `spec.md` §4.2.
pub(crate) fn is_reusable(conn: &mut Connection, cfg: &PoolConfig) -> bool {
    if conn.is_closed() || !conn.keep_alive() {
        return false;
    }
    if let Some(max_idle) = cfg.max_conn_idle {
        if conn.last_used_at().elapsed() > max_idle {
            return false;
        }
    }
    if let Some(max_reqs) = cfg.max_conn_requests {
        if conn.requests_served() >= max_reqs {
            return false;
        }
    }
    if conn.peek_is_stale() {
        return false;
    }
    true
}

pub(crate) fn acquire_timeout_error() -> Error {
    Error::pool_acquire_timeout()
}

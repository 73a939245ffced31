//! Per-pool tuning (`spec.md` §3 `PoolConfig`).

use std::time::Duration;

/// Which pool acquisition/reuse policy a [`super::Pool`] implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// LIFO reuse of the most-recently-released live connection; opens a
    /// new one when nothing reusable is idle.
    Smart,
    /// Fixed-size ring of slots acquired by index, for predictable reuse
    /// patterns (`spec.md` §4.2). Retained as a capability; no tuning
    /// heuristic is required for it (`spec.md` §9 Open Questions).
    Cyclic,
}

/// Tuning knobs for one `(scheme, host, port)` bucket's connection pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Hard cap on concurrent connections for this bucket.
    pub size: usize,
    /// Which acquisition policy to use.
    pub kind: PoolKind,
    /// Max requests served before a connection is retired on release.
    /// `None` means unbounded.
    pub max_conn_requests: Option<u64>,
    /// Max idle duration before a connection is discarded on acquire.
    /// `None` means unbounded.
    pub max_conn_idle: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            size: 25,
            kind: PoolKind::Smart,
            max_conn_requests: None,
            max_conn_idle: None,
        }
    }
}

impl PoolConfig {
    /// Starts from defaults (`size=25`, `Smart`, unbounded requests/idle).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hard connection cap.
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Selects the acquisition policy.
    pub fn kind(mut self, kind: PoolKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the max-requests-per-connection reuse bound.
    pub fn max_conn_requests(mut self, max: u64) -> Self {
        self.max_conn_requests = Some(max);
        self
    }

    /// Sets the max-idle-duration reuse bound.
    pub fn max_conn_idle(mut self, max: Duration) -> Self {
        self.max_conn_idle = Some(max);
        self
    }
}

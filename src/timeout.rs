//! Per-phase timeout policy.

use std::time::{Duration, Instant};

use crate::error::{Error, Result, TimeoutPhase};

/// Deadlines applicable to the phases of a single request.
///
/// Each field is independently optional; `spec.md` §5 requires that "each
/// I/O step is bounded by the most specific applicable deadline" while an
/// overall `request_timeout`, if set, bounds the whole exchange regardless
/// of how the per-phase timeouts are spent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeouts {
    /// Bound on establishing a TCP (or TLS) connection.
    pub sock_connect: Option<Duration>,
    /// Bound on a single read from an established connection.
    pub sock_read: Option<Duration>,
    /// Bound on the entire request/response exchange.
    pub request_timeout: Option<Duration>,
    /// Bound on waiting for a pool slot.
    pub pool_acquire: Option<Duration>,
}

impl Timeouts {
    /// No timeouts at all; operations can block indefinitely.
    pub fn none() -> Self {
        Self::default()
    }

    /// Overrides any fields set in `other`, keeping `self`'s values where `other` is `None`.
    pub fn overridden_by(mut self, other: Timeouts) -> Self {
        if other.sock_connect.is_some() {
            self.sock_connect = other.sock_connect;
        }
        if other.sock_read.is_some() {
            self.sock_read = other.sock_read;
        }
        if other.request_timeout.is_some() {
            self.request_timeout = other.request_timeout;
        }
        if other.pool_acquire.is_some() {
            self.pool_acquire = other.pool_acquire;
        }
        self
    }
}

/// Tracks the overall request deadline and composes it with a per-phase
/// timeout to produce the single deadline that bounds the *next* blocking
/// step, per `spec.md` §2/C2.
#[derive(Debug, Clone)]
pub struct DeadlineClock {
    started: Instant,
    overall: Option<Duration>,
}

impl DeadlineClock {
    /// Starts a new clock for a request governed by `timeouts`.
    pub fn start(timeouts: &Timeouts) -> Self {
        Self {
            started: Instant::now(),
            overall: timeouts.request_timeout,
        }
    }

    /// Returns the duration remaining before `request_timeout` elapses, if any.
    fn overall_remaining(&self) -> Option<Duration> {
        self.overall.map(|total| {
            let elapsed = self.started.elapsed();
            total.saturating_sub(elapsed)
        })
    }

    /// Composes the overall deadline with a phase-specific timeout, returning
    /// whichever is tighter. Returns `None` if neither applies (step can block
    /// indefinitely).
    pub fn step(&self, phase_timeout: Option<Duration>) -> Option<Duration> {
        match (self.overall_remaining(), phase_timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Runs `fut`, racing it against the composed deadline for `phase`.
    ///
    /// If the overall deadline has already elapsed, fails immediately with
    /// `Timeout(Request, ...)`; otherwise the more specific `phase` is
    /// reported on timeout.
    pub async fn run<F, T>(&self, phase: TimeoutPhase, phase_timeout: Option<Duration>, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = T>,
    {
        let Some(bound) = self.step(phase_timeout) else {
            return Ok(fut.await);
        };
        if bound.is_zero() && self.overall_remaining() == Some(Duration::ZERO) {
            return Err(Error::timeout(TimeoutPhase::Request, self.overall.unwrap_or_default()));
        }
        match tokio::time::timeout(bound, fut).await {
            Ok(v) => Ok(v),
            Err(_) => {
                // If the overall deadline was the tighter bound, report it as
                // the request-level timeout rather than the phase timeout.
                let report_phase = match (self.overall_remaining(), phase_timeout) {
                    (Some(a), Some(b)) if a < b => TimeoutPhase::Request,
                    (Some(_), None) => TimeoutPhase::Request,
                    _ => phase,
                };
                Err(Error::timeout(report_phase, bound))
            }
        }
    }
}

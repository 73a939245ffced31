//! LIFO reuse pool (`spec.md` §4.2 "Smart").

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::Semaphore;

use super::{Acquired, Connection, Pool, PoolConfig, PoolStats, acquire_timeout_error, is_reusable};
use crate::error::Result;

/// Attempts LIFO reuse of a still-alive idle connection; otherwise signals
/// the caller to open a new one. On release, puts the connection back if
/// it is still reusable.
pub struct SmartPool {
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<Connection>>,
    created: AtomicU64,
    served: AtomicU64,
    leased: AtomicU64,
}

impl SmartPool {
    /// Builds a new pool with `config.size` slots.
    pub fn new(config: PoolConfig) -> Self {
        SmartPool {
            semaphore: Arc::new(Semaphore::new(config.size)),
            config,
            idle: Mutex::new(VecDeque::new()),
            created: AtomicU64::new(0),
            served: AtomicU64::new(0),
            leased: AtomicU64::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Pool for SmartPool {
    async fn acquire(&self, acquire_timeout: Option<Duration>) -> Result<Acquired> {
        let permit = match acquire_timeout {
            Some(d) => tokio::time::timeout(d, self.semaphore.clone().acquire_owned())
                .await
                .map_err(|_| acquire_timeout_error())?
                .expect("semaphore not closed"),
            None => self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore not closed"),
        };
        // The permit is deliberately forgotten (not dropped) here: dropping
        // it would immediately return it to the semaphore, undoing the
        // reservation we just made. Slot release happens explicitly in
        // `release` via `add_permits`, once the caller is done with the
        // connection — this keeps the permit's lifetime decoupled from the
        // `Connection` value threaded through the H1/WS engines.
        permit.forget();

        self.leased.fetch_add(1, Ordering::SeqCst);

        // LIFO scan: pop from the back (most recently released) until we
        // find a survivor or the idle list is empty.
        let mut idle = self.idle.lock().expect("pool poisoned");
        while let Some(mut conn) = idle.pop_back() {
            if is_reusable(&mut conn, &self.config) {
                return Ok(Acquired::Reused(conn));
            }
            // Violates reuse conditions: drop it and keep scanning, per
            // `spec.md` §4.2 "discard any that violate reuse conditions".
        }
        Ok(Acquired::NeedsDial)
    }

    fn release(&self, conn: Option<Connection>) {
        self.leased.fetch_sub(1, Ordering::SeqCst);
        self.semaphore.add_permits(1);

        if let Some(mut conn) = conn {
            if is_reusable(&mut conn, &self.config) {
                self.idle.lock().expect("pool poisoned").push_back(conn);
            }
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            connections_created: self.created.load(Ordering::SeqCst),
            requests_served: self.served.load(Ordering::SeqCst),
            idle: self.idle.lock().expect("pool poisoned").len(),
            leased: self.leased.load(Ordering::SeqCst) as usize,
        }
    }

    async fn drain(&self) {
        let mut idle = self.idle.lock().expect("pool poisoned");
        for mut conn in idle.drain(..) {
            conn.close();
        }
    }

    fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn record_created(&self) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn record_request(&self) {
        self.served.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::origin::{ConnectionKey, Origin, Scheme};
    use crate::stream::BoxStream;
    use tokio::io::duplex;

    fn test_key() -> ConnectionKey {
        ConnectionKey::direct(Origin::new(Scheme::Http, "example.com", Some(80)))
    }

    fn fake_connection() -> Connection {
        let (a, _b) = duplex(64);
        Connection::new(test_key(), BoxStream::new(a))
    }

    #[tokio::test]
    async fn reuses_released_connection() {
        let pool = SmartPool::new(PoolConfig::new().size(1));
        assert!(matches!(pool.acquire(None).await.unwrap(), Acquired::NeedsDial));
        let mut conn = fake_connection();
        conn.record_exchange();
        pool.release(Some(conn));
        assert_eq!(pool.stats().idle, 1);

        match pool.acquire(None).await.unwrap() {
            Acquired::Reused(conn) => assert_eq!(conn.requests_served(), 1),
            Acquired::NeedsDial => panic!("expected reuse"),
        }
    }

    #[tokio::test]
    async fn respects_max_conn_requests() {
        let pool = SmartPool::new(PoolConfig::new().size(1).max_conn_requests(1));
        let mut conn = fake_connection();
        conn.record_exchange();
        pool.release(Some(conn));
        // The released connection already hit its request cap, so it
        // should not have been stored as reusable.
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn pool_conservation_holds() {
        let pool = SmartPool::new(PoolConfig::new().size(2));
        let a = pool.acquire(None).await.unwrap();
        let b = pool.acquire(None).await.unwrap();
        assert!(matches!(a, Acquired::NeedsDial));
        assert!(matches!(b, Acquired::NeedsDial));
        assert_eq!(pool.semaphore.available_permits(), 0);
        assert_eq!(pool.stats().leased, 2);
        pool.release(None);
        assert_eq!(pool.semaphore.available_permits(), 1);
        assert_eq!(pool.stats().leased, 1);
        pool.release(None);
        assert_eq!(pool.semaphore.available_permits(), 2);
    }

    #[tokio::test]
    async fn acquire_times_out_when_exhausted() {
        let pool = SmartPool::new(PoolConfig::new().size(1));
        let _a = pool.acquire(None).await.unwrap();
        let err = pool
            .acquire(Some(Duration::from_millis(5)))
            .await
            .unwrap_err();
        assert!(err.is_pool_timeout());
    }
}

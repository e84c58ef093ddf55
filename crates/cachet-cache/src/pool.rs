//! Connection pool for backend tiers.
//!
//! A thin layer over [`deadpool::managed::Pool`] that maps pool failures into
//! [`CacheError::ConnectionUnavailable`] and hands out an RAII [`Lease`].
//!
//! ## Guarantees
//!
//! - A connection is held by at most one lease at a time.
//! - Dropping a lease returns the connection exactly once, on every exit path
//!   including `?` and panics.
//! - At most `max_size` connections exist; a lease request waits up to
//!   `wait_timeout` for one to free up, then fails.
//! - Connections are created lazily. The manager's `recycle` runs before an
//!   idle connection is handed out again (for Redis, a `PING`); one that fails
//!   is dropped and replaced on demand.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use deadpool::Runtime;
use deadpool::managed::{Manager, Object, Pool, PoolError, TimeoutType};

use crate::error::{CacheError, CacheResult};
use crate::tier::Tier;

/// Pool sizing and timeouts.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_size: usize,
    /// Bounds waiting for a free connection, creating one, and recycling one.
    pub timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    /// Connections currently open.
    pub size: usize,
    /// Open connections sitting idle in the pool.
    pub available: usize,
    /// Tasks waiting for a connection.
    pub waiting: usize,
}

impl PoolStatus {
    /// Connections currently leased out.
    pub fn in_flight(&self) -> usize {
        self.size.saturating_sub(self.available)
    }
}

/// Bounded pool of backend connections for one tier.
pub struct ConnectionPool<M: Manager> {
    tier: Tier,
    pool: Pool<M>,
}

impl<M: Manager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            tier: self.tier,
            pool: self.pool.clone(),
        }
    }
}

impl<M: Manager> std::fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("tier", &self.tier)
            .field("status", &self.status())
            .finish()
    }
}

impl<M: Manager> ConnectionPool<M> {
    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    /// Close the pool; open connections are dropped and later leases fail.
    pub fn close(&self) {
        self.pool.close();
    }
}

impl<M> ConnectionPool<M>
where
    M: Manager,
    M::Error: std::fmt::Display,
{
    /// Build a pool. No connection is opened until the first lease.
    pub fn new(tier: Tier, manager: M, config: PoolConfig) -> CacheResult<Self> {
        let pool = Pool::builder(manager)
            .max_size(config.max_size)
            .wait_timeout(Some(config.timeout))
            .create_timeout(Some(config.timeout))
            .recycle_timeout(Some(config.timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| CacheError::config(format!("failed to build {tier} pool: {e}")))?;
        Ok(Self { tier, pool })
    }

    /// Lease a connection, waiting for one to free up if the pool is full.
    pub async fn lease(&self) -> CacheResult<Lease<M>> {
        match self.pool.get().await {
            Ok(object) => Ok(Lease { object }),
            Err(e) => {
                let message = match e {
                    PoolError::Timeout(TimeoutType::Wait) => {
                        "timed out waiting for a free connection".to_string()
                    }
                    PoolError::Timeout(TimeoutType::Create) => {
                        "timed out opening a connection".to_string()
                    }
                    PoolError::Timeout(TimeoutType::Recycle) => {
                        "timed out checking connection health".to_string()
                    }
                    PoolError::Closed => "pool is closed".to_string(),
                    other => other.to_string(),
                };
                tracing::debug!(tier = %self.tier, error = %message, "connection lease failed");
                Err(CacheError::unavailable(self.tier, message))
            }
        }
    }
}

/// A leased connection. Dropping it returns the connection to the pool.
pub struct Lease<M: Manager> {
    object: Object<M>,
}

impl<M: Manager> std::fmt::Debug for Lease<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").finish_non_exhaustive()
    }
}

impl<M: Manager> Lease<M> {
    /// Remove the connection from the pool instead of returning it, e.g.
    /// after a transport error. The pool opens a replacement on demand.
    pub fn discard(self) {
        drop(Object::take(self.object));
    }
}

impl<M: Manager> Deref for Lease<M> {
    type Target = M::Type;

    fn deref(&self) -> &M::Type {
        &self.object
    }
}

impl<M: Manager> DerefMut for Lease<M> {
    fn deref_mut(&mut self) -> &mut M::Type {
        &mut self.object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deadpool::managed::{Metrics, RecycleError, RecycleResult};
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingManager {
        created: AtomicUsize,
        unhealthy: AtomicBool,
        refuse: AtomicBool,
    }

    impl Manager for CountingManager {
        type Type = usize;
        type Error = io::Error;

        async fn create(&self) -> Result<usize, io::Error> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        async fn recycle(&self, _conn: &mut usize, _: &Metrics) -> RecycleResult<io::Error> {
            if self.unhealthy.load(Ordering::SeqCst) {
                return Err(RecycleError::Backend(io::Error::other("ping failed")));
            }
            Ok(())
        }
    }

    fn pool(max_size: usize) -> ConnectionPool<CountingManager> {
        ConnectionPool::new(
            Tier::Remote,
            CountingManager::default(),
            PoolConfig {
                max_size,
                timeout: Duration::from_millis(50),
            },
        )
        .unwrap()
    }

    async fn failing_operation(pool: &ConnectionPool<CountingManager>) -> CacheResult<()> {
        let lease = pool.lease().await?;
        assert_eq!(*lease, 0);
        Err(CacheError::backend(Tier::Remote, "get", "injected failure"))
    }

    #[tokio::test]
    async fn connections_are_created_lazily() {
        let pool = pool(4);
        assert_eq!(pool.status().size, 0);

        let lease = pool.lease().await.unwrap();
        assert_eq!(pool.status().size, 1);
        assert_eq!(pool.status().in_flight(), 1);
        drop(lease);
        assert_eq!(pool.status().available, 1);
    }

    #[tokio::test]
    async fn failure_inside_operation_still_releases() {
        let pool = pool(2);
        drop(pool.lease().await.unwrap());
        let before = pool.status();

        let err = failing_operation(&pool).await.unwrap_err();
        assert!(!err.is_unavailable());

        assert_eq!(pool.status(), before);
        assert_eq!(pool.status().in_flight(), 0);
    }

    #[tokio::test]
    async fn lease_never_exceeds_bound() {
        let pool = pool(2);
        let a = pool.lease().await.unwrap();
        let b = pool.lease().await.unwrap();
        assert_ne!(*a, *b);
        assert_eq!(pool.status().in_flight(), 2);

        let err = pool.lease().await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(pool.status().size, 2);

        drop(a);
        let c = pool.lease().await.unwrap();
        assert_eq!(pool.status().in_flight(), 2);
        drop((b, c));
    }

    #[tokio::test]
    async fn waiting_lease_gets_released_connection() {
        let pool = ConnectionPool::new(
            Tier::Remote,
            CountingManager::default(),
            PoolConfig {
                max_size: 1,
                timeout: Duration::from_secs(2),
            },
        )
        .unwrap();
        let held = pool.lease().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.lease().await.map(|lease| *lease) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn unhealthy_connection_is_replaced() {
        let manager = CountingManager::default();
        let pool = ConnectionPool::new(Tier::Remote, manager, PoolConfig::default()).unwrap();
        drop(pool.lease().await.unwrap());

        pool.pool.manager().unhealthy.store(true, Ordering::SeqCst);
        let lease = pool.lease().await.unwrap();
        assert_eq!(*lease, 1);
        assert_eq!(pool.pool.manager().created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn discarded_connection_is_not_reused() {
        let pool = pool(2);
        pool.lease().await.unwrap().discard();
        assert_eq!(pool.status().size, 0);

        let lease = pool.lease().await.unwrap();
        assert_eq!(*lease, 1);
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        let pool = pool(2);
        pool.pool.manager().refuse.store(true, Ordering::SeqCst);
        let err = pool.lease().await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("refused"));
    }

    #[tokio::test]
    async fn closed_pool_rejects_leases() {
        let pool = pool(2);
        pool.close();
        assert!(pool.lease().await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn concurrent_leases_stay_within_bound() {
        let pool = Arc::new(ConnectionPool::new(
            Tier::Remote,
            CountingManager::default(),
            PoolConfig {
                max_size: 3,
                timeout: Duration::from_secs(2),
            },
        )
        .unwrap());

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                let _lease = pool.lease().await.unwrap();
                assert!(pool.status().in_flight() <= 3);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(pool.status().size <= 3);
        assert_eq!(pool.status().in_flight(), 0);
    }
}

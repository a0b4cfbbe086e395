//! Generic connection pool (§4.9): acquire/release over a fixed-size set
//! of driver connections, FIFO-fair waiters, liveness check and
//! reconnect-once on checkout, and a circuit breaker gating acquisition
//! while the backing resource looks down. Grounded directly on
//! `original_source/framework/src/drivers/postgres/pg_pool.cpp`'s
//! acquire/release structure, reimplemented with `tokio::sync::{Mutex,
//! Semaphore}` in place of the donor's hand-rolled waiter queue — a
//! `Semaphore`'s `acquire()` is already FIFO, so it replaces the donor's
//! waiter list without changing the fairness guarantee (§9).

use crate::pipeline::BoxFuture;
use std::{collections::VecDeque, future::Future, ops::{Deref, DerefMut}, sync::Arc, time::Duration};
use tokio::sync::{Mutex, Semaphore};

use super::breaker::CircuitBreaker;

/// Errors internal to the pool, distinct from query-semantic errors raised
/// by a driver (§4.9: "one automatic retry after forced-close on a
/// connection-level error only, not query-semantic errors").
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("acquiring a connection timed out")]
    Timeout,
    #[error("circuit breaker is open")]
    BreakerOpen,
    #[error("pool is closed")]
    Closed,
    #[error("connection is dead and could not be reconnected")]
    ConnectionDead,
    #[error("query failed: {0}")]
    Query(String),
}

impl From<DbError> for crate::error::Error {
    fn from(e: DbError) -> Self {
        use crate::error::ResourceError;
        match e {
            DbError::Timeout => Self::Resource(ResourceError::PoolTimeout),
            DbError::BreakerOpen => Self::Resource(ResourceError::BreakerOpen),
            DbError::Closed | DbError::ConnectionDead => {
                Self::Resource(ResourceError::Query("connection unavailable".into()))
            }
            DbError::Query(msg) => Self::Resource(ResourceError::Query(msg)),
        }
    }
}

/// What a pooled connection must support for the pool to manage its
/// lifecycle: liveness checks, reconnection, and transaction boundaries.
/// Query execution itself is driver-specific and lives on the concrete
/// connection type (see `db::drivers::*`), not on this trait, since
/// parameter binding differs per wire protocol.
pub trait PoolConnection: Send + 'static {
    fn is_alive(&mut self) -> BoxFuture<'_, bool>;
    fn reconnect(&mut self) -> BoxFuture<'_, Result<(), DbError>>;
    fn begin(&mut self) -> BoxFuture<'_, Result<(), DbError>>;
    fn commit(&mut self) -> BoxFuture<'_, Result<(), DbError>>;
    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DbError>>;
}

type Connector<C> = Box<dyn Fn() -> BoxFuture<'static, Result<C, DbError>> + Send + Sync>;

/// A fixed-capacity pool of `C` (§4.9). Construct with [`Pool::new`],
/// sharing the returned `Arc` across handlers via the service provider.
pub struct Pool<C: PoolConnection> {
    idle: Mutex<VecDeque<C>>,
    permits: Semaphore,
    connector: Connector<C>,
    breaker: CircuitBreaker,
    acquire_timeout: Duration,
}

impl<C: PoolConnection> Pool<C> {
    pub fn new<F, Fut>(config: &crate::config::PoolConfig, connector: F) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C, DbError>> + Send + 'static,
    {
        Arc::new(Self {
            idle: Mutex::new(VecDeque::with_capacity(config.size)),
            permits: Semaphore::new(config.size),
            connector: Box::new(move || Box::pin(connector())),
            breaker: CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown),
            acquire_timeout: config.acquire_timeout,
        })
    }

    /// Checks out a connection, waiting in FIFO order if the pool is fully
    /// checked out, failing fast if the breaker is open, and performing a
    /// liveness check (reconnecting once if dead) before handing it back
    /// (§4.9).
    pub async fn acquire(self: &Arc<Self>) -> Result<Lease<C>, DbError> {
        if !self.breaker.allow().await {
            return Err(DbError::BreakerOpen);
        }

        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.acquire())
            .await
            .map_err(|_| DbError::Timeout)?
            .map_err(|_| DbError::Closed)?;
        permit.forget();

        let existing = self.idle.lock().await.pop_front();
        let mut conn = match existing {
            Some(c) => c,
            None => match (self.connector)().await {
                Ok(c) => {
                    self.breaker.record_success();
                    c
                }
                Err(e) => {
                    self.breaker.record_failure().await;
                    self.permits.add_permits(1);
                    return Err(e);
                }
            },
        };

        if !conn.is_alive().await {
            if let Err(e) = conn.reconnect().await {
                self.breaker.record_failure().await;
                self.permits.add_permits(1);
                return Err(e);
            }
        }
        self.breaker.record_success();

        Ok(Lease {
            pool: Arc::clone(self),
            conn: Some(conn),
        })
    }

    /// Runs `block` inside a transaction on a single pinned connection:
    /// `begin()` before, `commit()` on `Ok`, `rollback()` on `Err`.
    /// Transactions do not nest (§4.9).
    pub async fn transaction<F, Fut, T>(self: &Arc<Self>, block: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Transaction<C>) -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        let lease = self.acquire().await?;
        let mut tx = Transaction { lease };
        tx.lease.conn_mut().begin().await?;

        match block(&mut tx).await {
            Ok(value) => {
                tx.lease.conn_mut().commit().await?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.lease.conn_mut().rollback().await;
                Err(err)
            }
        }
    }
}

/// A checked-out connection. Returned to the pool's idle set on drop.
pub struct Lease<C: PoolConnection> {
    pool: Arc<Pool<C>>,
    conn: Option<C>,
}

impl<C: PoolConnection> Lease<C> {
    fn conn_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C: PoolConnection> Deref for Lease<C> {
    type Target = C;
    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C: PoolConnection> DerefMut for Lease<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn_mut()
    }
}

impl<C: PoolConnection> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                pool.idle.lock().await.push_back(conn);
            });
        }
        self.pool.permits.add_permits(1);
    }
}

/// A connection pinned for the duration of one transaction (§4.9
/// "transaction scope"). Derefs to the underlying connection so driver
/// query methods can be called directly within the `transaction` closure.
pub struct Transaction<C: PoolConnection> {
    lease: Lease<C>,
}

impl<C: PoolConnection> Deref for Transaction<C> {
    type Target = C;
    fn deref(&self) -> &C {
        &self.lease
    }
}

impl<C: PoolConnection> DerefMut for Transaction<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.lease
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeConn {
        alive: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl PoolConnection for FakeConn {
        fn is_alive(&mut self) -> BoxFuture<'_, bool> {
            Box::pin(async move { self.alive })
        }
        fn reconnect(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
            Box::pin(async move {
                self.alive = true;
                Ok(())
            })
        }
        fn begin(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
            let log = self.log.clone();
            Box::pin(async move {
                log.lock().await.push("begin");
                Ok(())
            })
        }
        fn commit(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
            let log = self.log.clone();
            Box::pin(async move {
                log.lock().await.push("commit");
                Ok(())
            })
        }
        fn rollback(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
            let log = self.log.clone();
            Box::pin(async move {
                log.lock().await.push("rollback");
                Ok(())
            })
        }
    }

    fn test_config(size: usize) -> crate::config::PoolConfig {
        crate::config::PoolConfig {
            size,
            acquire_timeout: Duration::from_millis(200),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(5),
            _priv: (),
        }
    }

    #[tokio::test]
    async fn acquire_reuses_released_connections() {
        let built = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));
        let built2 = built.clone();
        let log2 = log.clone();
        let pool = Pool::new(&test_config(1), move || {
            built2.fetch_add(1, Ordering::SeqCst);
            let log = log2.clone();
            async move { Ok(FakeConn { alive: true, log }) }
        });

        {
            let _lease = pool.acquire().await.unwrap();
        }
        tokio::task::yield_now().await;
        let _lease = pool.acquire().await.unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dead_connection_is_reconnected_on_acquire() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = Pool::new(&test_config(1), {
            let log = log.clone();
            move || {
                let log = log.clone();
                async move { Ok(FakeConn { alive: false, log }) }
            }
        });

        let lease = pool.acquire().await.unwrap();
        assert!(lease.alive);
    }

    #[tokio::test]
    async fn transaction_commits_on_success_and_rolls_back_on_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = Pool::new(&test_config(1), {
            let log = log.clone();
            move || {
                let log = log.clone();
                async move { Ok(FakeConn { alive: true, log }) }
            }
        });

        pool.transaction(|_tx| async { Ok::<_, DbError>(()) }).await.unwrap();
        let _: Result<(), DbError> = pool
            .transaction(|_tx| async { Err(DbError::Query("boom".into())) })
            .await;

        let entries = log.lock().await.clone();
        assert_eq!(entries, vec!["begin", "commit", "begin", "rollback"]);
    }

    #[tokio::test]
    async fn waiters_are_served_fifo_under_single_slot_contention() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = Pool::new(&test_config(1), {
            let log = log.clone();
            move || {
                let log = log.clone();
                async move { Ok(FakeConn { alive: true, log }) }
            }
        });

        let order = Arc::new(Mutex::new(Vec::new()));
        let first = pool.acquire().await.unwrap();

        let pool2 = pool.clone();
        let order2 = order.clone();
        let waiter = tokio::spawn(async move {
            let _lease = pool2.acquire().await.unwrap();
            order2.lock().await.push(1);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().await.push(0);
        drop(first);
        waiter.await.unwrap();

        assert_eq!(order.lock().await.clone(), vec![0, 1]);
    }
}

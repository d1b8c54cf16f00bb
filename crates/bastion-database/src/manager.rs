//! Connection manager: pool lifecycle, instrumented execution, transactions and health.

use crate::error::{DbError, Result};
use crate::health::{self, HealthReport};
use crate::instrumentation::QueryTimer;
use crate::metrics::{QueryMetric, QueryMetricsBuffer, QueryStats};
use crate::params::{bind_all, SqlParam};
use crate::pool::{self, PoolStats};
use crate::retry::Backoff;
use bastion_common_config::DatabaseConfig;
use futures_util::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgQueryResult, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

/// Handle to the database. Clones share one pool and one metrics buffer.
///
/// A handle starts uninitialized; [`initialize`](Self::initialize) opens the
/// pool and [`close`](Self::close) drains it again.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: DatabaseConfig,
    pool: RwLock<Option<PgPool>>,
    /// Serializes `initialize`; the pool lock is only taken to store the result.
    init: Mutex<()>,
    metrics: QueryMetricsBuffer,
    waiting: AtomicUsize,
}

/// Counts a caller as waiting for a connection until dropped.
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConnectionManager {
    pub fn new(config: DatabaseConfig) -> Self {
        let metrics = QueryMetricsBuffer::new(config.metrics_buffer_size, config.slow_query_threshold());
        Self {
            inner: Arc::new(Inner {
                config,
                pool: RwLock::new(None),
                init: Mutex::new(()),
                metrics,
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Open the pool, retrying with exponential backoff.
    ///
    /// Returns immediately when a pool is already open. Concurrent callers
    /// wait for the first one to finish. Readers such as
    /// [`check_health`](Self::check_health) are not blocked while it retries.
    #[instrument(skip(self), fields(target = %self.inner.config.display_target()))]
    pub async fn initialize(&self) -> Result<()> {
        let _init = self.inner.init.lock().await;
        if self.is_initialized().await {
            debug!("Connection manager already initialized");
            return Ok(());
        }

        let config = &self.inner.config;
        let mut backoff = Backoff::new(
            config.connect_retries,
            config.retry_base_delay(),
            config.retry_max_delay(),
        );
        let mut last_error = None;

        while backoff.start_attempt() {
            let attempt = backoff.attempts();
            match pool::create_pool(config).await {
                Ok(pool) => {
                    info!(attempt, "Database connection established");
                    *self.inner.pool.write().await = Some(pool);
                    return Ok(());
                }
                Err(e) => {
                    match backoff.next_delay() {
                        Some(delay) => {
                            warn!(
                                attempt,
                                max_attempts = backoff.max_attempts(),
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "Database connection failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(attempt, error = %e, "Database connection failed, giving up");
                        }
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(DbError::Connection {
            attempts: backoff.attempts(),
            source: last_error.unwrap_or(sqlx::Error::PoolTimedOut),
        })
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.pool.read().await.is_some()
    }

    /// Clone of the live pool.
    pub async fn pool(&self) -> Result<PgPool> {
        self.inner
            .pool
            .read()
            .await
            .clone()
            .ok_or(DbError::NotInitialized)
    }

    /// Run one statement and return its rows.
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<PgRow>> {
        let pool = self.pool().await?;
        self.instrumented(sql, async {
            let mut conn = self.acquire(&pool).await?;
            bind_all(sql, params).fetch_all(&mut *conn).await
        })
        .await
    }

    /// Run one statement and return its result (rows affected).
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<PgQueryResult> {
        let pool = self.pool().await?;
        self.instrumented(sql, async {
            let mut conn = self.acquire(&pool).await?;
            bind_all(sql, params).execute(&mut *conn).await
        })
        .await
    }

    /// Like [`query`](Self::query), on a connection the caller already holds.
    pub async fn query_on(&self, conn: &mut PgConnection, sql: &str, params: &[SqlParam]) -> Result<Vec<PgRow>> {
        self.instrumented(sql, bind_all(sql, params).fetch_all(&mut *conn)).await
    }

    /// Like [`execute`](Self::execute), on a connection the caller already holds.
    pub async fn execute_on(
        &self,
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<PgQueryResult> {
        self.instrumented(sql, bind_all(sql, params).execute(&mut *conn)).await
    }

    /// Run a multi-statement script over the simple query protocol.
    ///
    /// The body is sent as written, so it takes no parameters.
    pub async fn execute_script_on(&self, conn: &mut PgConnection, sql: &str) -> Result<PgQueryResult> {
        self.instrumented(sql, sqlx::raw_sql(sql).execute(&mut *conn)).await
    }

    /// Check out one pooled connection. Counts as waiting until it arrives.
    pub async fn connection(&self) -> Result<PoolConnection<Postgres>> {
        let pool = self.pool().await?;
        self.acquire(&pool).await.map_err(|source| DbError::Query {
            statement: "acquire connection".to_string(),
            source,
        })
    }

    /// Begin a transaction pinned to one pooled connection.
    ///
    /// Dropping the transaction without committing rolls it back and returns
    /// the connection to the pool.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let pool = self.pool().await?;
        let _waiting = WaitGuard::enter(&self.inner.waiting);
        pool.begin().await.map_err(DbError::Transaction)
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// The connection is released afterwards in both cases.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T>>,
    {
        let mut tx = self.begin().await?;

        match f(&mut *tx).await {
            Ok(value) => {
                tx.commit().await.map_err(DbError::Transaction)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed; connection will be discarded");
                }
                Err(e)
            }
        }
    }

    /// Probe the database. Never fails; problems are reported in the result.
    pub async fn check_health(&self) -> HealthReport {
        let pool = match self.pool().await {
            Ok(pool) => pool,
            Err(e) => return HealthReport::unavailable(e.to_string()),
        };

        let max = self.inner.config.max_connections;
        let waiting = &self.inner.waiting;
        health::check_health(&pool, self.inner.config.health_check_timeout(), || {
            PoolStats::from_pool(&pool, waiting.load(Ordering::SeqCst), max)
        })
        .await
    }

    pub async fn pool_stats(&self) -> Result<PoolStats> {
        let pool = self.pool().await?;
        Ok(PoolStats::from_pool(
            &pool,
            self.inner.waiting.load(Ordering::SeqCst),
            self.inner.config.max_connections,
        ))
    }

    pub fn get_query_stats(&self) -> QueryStats {
        self.inner.metrics.stats()
    }

    /// Buffered query metrics, oldest first.
    pub fn get_query_metrics(&self) -> Vec<QueryMetric> {
        self.inner.metrics.snapshot()
    }

    pub fn get_slow_queries(&self) -> Vec<QueryMetric> {
        self.inner.metrics.slow_queries()
    }

    pub fn clear_query_metrics(&self) {
        self.inner.metrics.clear();
    }

    /// Drain and close the pool. Safe to call more than once.
    pub async fn close(&self) {
        let pool = self.inner.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            info!("Database pool closed");
        }
    }

    async fn acquire(&self, pool: &PgPool) -> std::result::Result<PoolConnection<Postgres>, sqlx::Error> {
        let _waiting = WaitGuard::enter(&self.inner.waiting);
        pool.acquire().await
    }

    async fn instrumented<T, Fut>(&self, sql: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let timer = QueryTimer::new(sql, self.inner.config.slow_query_threshold());
        let result = fut.await;
        let metric = timer.finish(result.as_ref().err());
        let statement = metric.statement.clone();
        self.inner.metrics.record(metric);
        result.map_err(|source| DbError::Query { statement, source })
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.inner.config.display_target())
            .field("buffered_metrics", &self.inner.metrics.len())
            .finish()
    }
}

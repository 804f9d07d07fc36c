//! Per-endpoint backend connection pool and the manager-owned registry that
//! maps shard id to pool (spec.md 4.3).

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::model::ShardId;

/// A pool bound to one backend endpoint URI. `acquire()` maps sqlx's own
/// timeout/IO failures onto [`Error::Timeout`] / [`Error::Unavailable`]
/// (spec.md 4.3).
pub struct BackendPool {
    endpoint: String,
    pool: PgPool,
}

impl BackendPool {
    pub async fn connect(endpoint: &str, config: &PoolConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_open)
            .min_connections(config.min_idle)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .test_before_acquire(true)
            .connect(endpoint)
            .await
            .map_err(Error::from)?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            pool,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// A live session, or `Timeout`/`Unavailable` (spec.md 4.3). A bad
    /// connection is detached and dropped rather than returned to the pool,
    /// since sqlx reclaims non-detached connections automatically on drop.
    pub async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>> {
        self.pool.acquire().await.map_err(|err| match err {
            sqlx::Error::PoolTimedOut => Error::Timeout(format!("pool exhausted for {}", self.endpoint)),
            sqlx::Error::PoolClosed => Error::Unavailable(format!("pool closed for {}", self.endpoint)),
            other => Error::BackendError {
                shard_id: self.endpoint.clone(),
                message: other.to_string(),
            },
        })
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Drain and destroy (spec.md 4.3 `close()`).
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Maps `ShardId -> Arc<BackendPool>`, created lazily on first use and
/// destroyed when the shard is removed (spec.md 4.3).
pub struct PoolRegistry {
    config: PoolConfig,
    pools: RwLock<HashMap<ShardId, Arc<BackendPool>>>,
}

impl PoolRegistry {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, shard_id: &ShardId, endpoint: &str) -> Result<Arc<BackendPool>> {
        if let Some(pool) = self.pools.read().await.get(shard_id) {
            if pool.endpoint() == endpoint {
                return Ok(Arc::clone(pool));
            }
        }
        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(shard_id) {
            if pool.endpoint() == endpoint {
                return Ok(Arc::clone(pool));
            }
        }
        let pool = Arc::new(BackendPool::connect(endpoint, &self.config).await?);
        pools.insert(shard_id.clone(), Arc::clone(&pool));
        Ok(pool)
    }

    /// Remove a shard's pool once it is no longer referenced. Outstanding
    /// `Arc<BackendPool>` handles already checked out keep the pool alive
    /// until they drop (spec.md 9).
    pub async fn remove(&self, shard_id: &ShardId) {
        let removed = self.pools.write().await.remove(shard_id);
        if let Some(pool) = removed {
            if let Some(pool) = Arc::into_inner(pool) {
                pool.close().await;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }
}

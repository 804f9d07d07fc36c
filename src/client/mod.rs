//! Smart Client (spec.md 4.7): fetches the application's shard list once,
//! refreshes it in the background, and routes requests from the
//! application process directly to backends, bypassing the Router.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::model::{ApplicationId, Shard, ShardId};
use crate::pool::PoolRegistry;
use crate::ring::ConsistentHashRing;
use crate::row::{bind_json_param, Row};

pub struct SmartClient {
    config: ClientConfig,
    application_id: ApplicationId,
    http: reqwest::Client,
    ring: RwLock<ConsistentHashRing>,
    shards: RwLock<HashMap<ShardId, Shard>>,
    pools: PoolRegistry,
    cancel: CancellationToken,
    refresh_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SmartClient {
    /// Fetches the shard list, builds the local ring, creates a pool per
    /// shard, and starts the background refresh loop (spec.md 4.7).
    pub async fn connect(config: ClientConfig) -> Result<Arc<Self>> {
        let application_id = ApplicationId::from(config.application_id.clone());
        let http = reqwest::Client::new();
        let pools = PoolRegistry::new(config.pool.clone());

        let client = Arc::new(Self {
            config,
            application_id,
            http,
            ring: RwLock::new(ConsistentHashRing::new()),
            shards: RwLock::new(HashMap::new()),
            pools,
            cancel: CancellationToken::new(),
            refresh_task: std::sync::Mutex::new(None),
        });
        client.refresh_once().await?;
        client.spawn_refresh_loop();
        Ok(client)
    }

    fn spawn_refresh_loop(self: &Arc<Self>) {
        let client = Arc::clone(self);
        let interval = client.config.refresh_interval;
        let cancel = client.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(err) = client.refresh_once().await {
                            tracing::warn!(error = %err, "smart client refresh failed");
                        }
                    }
                }
            }
        });
        *self.refresh_task.lock().unwrap() = Some(handle);
    }

    /// Refetches the shard list from the Manager, rebuilds the ring, opens
    /// pools for new shards, and drains pools for shards no longer present
    /// (spec.md 4.7).
    pub async fn refresh_once(&self) -> Result<()> {
        let url = format!(
            "{}/api/v1/shards?app={}",
            self.config.manager_base_url, self.application_id
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| Error::Unavailable(format!("manager unreachable: {err}")))?;
        let fetched: Vec<Shard> = response
            .json()
            .await
            .map_err(|err| Error::Internal(format!("invalid shard list from manager: {err}")))?;

        let mut ring = ConsistentHashRing::new();
        for shard in &fetched {
            if shard.status.serves_reads() {
                ring.add_shard(&shard.id, shard.vnode_count);
            }
        }

        let previous_ids: Vec<ShardId> = {
            let shards = self.shards.read().await;
            shards.keys().cloned().collect()
        };
        let fetched_ids: std::collections::HashSet<&ShardId> = fetched.iter().map(|s| &s.id).collect();
        for stale in previous_ids.iter().filter(|id| !fetched_ids.contains(id)) {
            self.pools.remove(stale).await;
        }

        *self.ring.write().await = ring;
        *self.shards.write().await = fetched.into_iter().map(|s| (s.id.clone(), s)).collect();
        Ok(())
    }

    async fn resolve(&self, shard_key: &str) -> Result<Shard> {
        let shard_id = {
            let ring = self.ring.read().await;
            ring.get_shard_for_key(shard_key)
        };
        let shard_id = match shard_id {
            Some(id) => id,
            None => {
                self.refresh_once().await?;
                self.ring
                    .read()
                    .await
                    .get_shard_for_key(shard_key)
                    .ok_or_else(|| Error::NotFound(format!("no active shards for {}", self.application_id)))?
            }
        };
        let shards = self.shards.read().await;
        shards
            .get(&shard_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("shard {shard_id} missing from local cache")))
    }

    /// `query(shard_key, sql, params…) -> rows` (spec.md 4.7): resolve,
    /// acquire, execute on primary.
    pub async fn query(&self, shard_key: &str, sql: &str, params: &[serde_json::Value]) -> Result<Vec<Row>> {
        let shard = self.resolve(shard_key).await?;
        self.query_on_shard(&shard.id, sql, params).await
    }

    /// `update(shard_key, sql, params…) -> affected_rows` (spec.md 4.7):
    /// same routing, DML semantics.
    pub async fn update(&self, shard_key: &str, sql: &str, params: &[serde_json::Value]) -> Result<u64> {
        let shard = self.resolve(shard_key).await?;
        let pool = self.pools.get_or_create(&shard.id, &shard.primary_endpoint).await?;
        let mut conn = pool.acquire().await?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_json_param(query, param);
        }
        let result = query.execute(conn.as_mut()).await?;
        Ok(result.rows_affected())
    }

    /// Admin path: execute against a specific shard regardless of routing
    /// (spec.md 4.7).
    pub async fn query_on_shard(&self, shard_id: &ShardId, sql: &str, params: &[serde_json::Value]) -> Result<Vec<Row>> {
        let endpoint = {
            let shards = self.shards.read().await;
            shards
                .get(shard_id)
                .map(|s| s.primary_endpoint.clone())
                .ok_or_else(|| Error::NotFound(format!("shard {shard_id} missing from local cache")))?
        };
        let pool = self.pools.get_or_create(shard_id, &endpoint).await?;
        let mut conn = pool.acquire().await?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_json_param(query, param);
        }
        let rows = query.fetch_all(conn.as_mut()).await?;
        Ok(rows.into_iter().map(Row::from).collect())
    }

    /// Admin path: scatter-gather across every known shard, returning the
    /// union of rows and logging (not aborting on) per-shard failures
    /// (spec.md 4.7).
    pub async fn query_all_shards(&self, sql: &str, params: &[serde_json::Value]) -> Vec<Row> {
        let shard_ids: Vec<ShardId> = {
            let shards = self.shards.read().await;
            shards.keys().cloned().collect()
        };
        let futures = shard_ids.iter().map(|id| self.query_on_shard(id, sql, params));
        let results = futures::future::join_all(futures).await;

        let mut rows = Vec::new();
        for (shard_id, result) in shard_ids.iter().zip(results) {
            match result {
                Ok(shard_rows) => rows.extend(shard_rows),
                Err(err) => tracing::warn!(%shard_id, error = %err, "query_all_shards: shard failed"),
            }
        }
        rows
    }

    /// Stops the background refresh loop and waits for in-flight pool
    /// sessions to drain via the cancellation token (spec.md 5).
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.refresh_task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

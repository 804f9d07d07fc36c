//! The data plane (spec.md 4.4): a stateless query dispatcher that caches
//! the catalog, selects primary vs. replica by consistency level, pools
//! backend connections and executes one statement per request.

pub mod policy;

use std::sync::Arc;
use std::time::Instant;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::model::{ApplicationId, Consistency, QueryRequest, QueryResponse, Shard};
use crate::pool::PoolRegistry;
use crate::row::{bind_json_param, Row};

use policy::PolicyEngine;

pub struct Router {
    catalog: Arc<Catalog>,
    pools: PoolRegistry,
    policy: PolicyEngine,
}

impl Router {
    /// Constructs the dispatcher and starts the policy-refresh bridge: an
    /// initial load of every `Application.policy` into the `PolicyEngine`,
    /// then a re-load on each catalog snapshot, mirroring the catalog's own
    /// watch bridge (spec.md 4.4 step 1 needs live tier/rate-limit data, not
    /// just what was on file at process start).
    pub fn new(catalog: Arc<Catalog>, pools: PoolRegistry, policy: PolicyEngine) -> Arc<Self> {
        let router = Arc::new(Self {
            catalog,
            pools,
            policy,
        });
        router.clone().spawn_policy_refresh_bridge();
        router
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    fn spawn_policy_refresh_bridge(self: Arc<Self>) {
        tokio::spawn(async move {
            if let Err(err) = self.refresh_policies().await {
                tracing::warn!(error = %err, "initial policy refresh failed");
            }
            let mut snapshots = self.catalog.watch();
            loop {
                match snapshots.recv().await {
                    Ok(_) => {
                        if let Err(err) = self.refresh_policies().await {
                            tracing::warn!(error = %err, "policy refresh failed");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "policy refresh bridge lagged, will catch up on the next snapshot");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn refresh_policies(&self) -> Result<()> {
        for app in self.catalog.list_applications().await? {
            self.policy.refresh(&app.id, app.policy).await;
        }
        Ok(())
    }

    /// `execute(request, app_id) -> {shard_id, rows, row_count, latency_ms}`
    /// (spec.md 4.4): policy, rate limit, resolve, select endpoint, acquire
    /// (with one primary fallback), execute, record latency.
    pub async fn execute(&self, request: QueryRequest, app_id: &ApplicationId) -> Result<QueryResponse> {
        let started = Instant::now();

        self.policy.enforce(app_id, request.consistency).await?;

        let shard = self.catalog.get_shard(&request.shard_key, app_id).await?;

        let endpoint = self.select_endpoint(&shard, request.consistency);

        let conn = match self.pools.get_or_create(&shard.id, &endpoint).await {
            Ok(pool) => pool.acquire().await,
            Err(err) => Err(err),
        };
        let mut conn = match conn {
            Ok(conn) => conn,
            Err(_) if endpoint != shard.primary_endpoint => {
                // Step 4 (spec.md 4.4): fall back to the primary once.
                let primary_pool = self
                    .pools
                    .get_or_create(&shard.id, &shard.primary_endpoint)
                    .await?;
                primary_pool.acquire().await?
            }
            Err(err) => return Err(err),
        };

        let rows = self.run_query(&mut conn, &request).await.map_err(|err| match err {
            Error::BackendError { message, .. } => Error::BackendError {
                shard_id: shard.id.to_string(),
                message,
            },
            other => other,
        })?;

        let latency_ms = started.elapsed().as_millis() as u64;
        let row_count = rows.len();
        Ok(QueryResponse {
            shard_id: shard.id,
            rows,
            row_count,
            latency_ms,
        })
    }

    /// Step 3 (spec.md 4.4): `strong` always goes to the primary; `eventual`
    /// with replicas available goes to the first one, else falls back to the
    /// primary.
    fn select_endpoint(&self, shard: &Shard, consistency: Consistency) -> String {
        match consistency {
            Consistency::Strong => shard.primary_endpoint.clone(),
            Consistency::Eventual => shard
                .replica_endpoints
                .first()
                .cloned()
                .unwrap_or_else(|| shard.primary_endpoint.clone()),
        }
    }

    /// Step 5 (spec.md 4.4): execute the parameterized query and scan the
    /// result set into driver-neutral rows.
    async fn run_query(
        &self,
        conn: &mut sqlx::pool::PoolConnection<sqlx::Postgres>,
        request: &QueryRequest,
    ) -> Result<Vec<Row>> {
        let mut query = sqlx::query(&request.sql);
        for param in &request.params {
            query = bind_json_param(query, param);
        }
        let rows = query.fetch_all(conn.as_mut()).await?;
        Ok(rows.into_iter().map(Row::from).collect())
    }
}

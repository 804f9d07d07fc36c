//! The migration state machine (spec.md 4.6): pending -> precopy ->
//! deltasync -> cutover -> validation -> completed/failed.

pub mod rowkey;
pub mod source;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::model::{ReshardJob, ReshardJobStatus, ReshardKind, Shard, ShardId, ShardStatus};
use crate::pool::PoolRegistry;
use crate::ring::ConsistentHashRing;

use source::{DeltaSyncSource, ReshardContext};

#[derive(Debug, Clone)]
pub struct ResharderConfig {
    pub batch_size: usize,
    pub quiescence: Duration,
    pub max_retries: u32,
    pub default_tables: Vec<String>,
}

/// Job state, swapped wholesale on every phase transition under a single
/// write lock (spec.md 5: "status transitions publish through an atomic
/// pointer swap, readable lock-free").
type JobHandle = Arc<RwLock<ReshardJob>>;

pub struct Resharder {
    catalog: Arc<Catalog>,
    pool_config: PoolConfig,
    source: Arc<dyn DeltaSyncSource>,
    config: ResharderConfig,
    jobs: RwLock<HashMap<String, JobHandle>>,
}

impl Resharder {
    pub fn new(
        catalog: Arc<Catalog>,
        pool_config: PoolConfig,
        source: Arc<dyn DeltaSyncSource>,
        config: ResharderConfig,
    ) -> Self {
        Self {
            catalog,
            pool_config,
            source,
            config,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Validates the split/merge range invariants (spec.md 4.5) and spawns
    /// the state machine. Returns immediately with the job id; progress is
    /// polled via [`Resharder::get_job`].
    pub async fn start_job(
        &self,
        kind: ReshardKind,
        sources: Vec<Shard>,
        targets: Vec<Shard>,
        tables: Option<Vec<String>>,
    ) -> Result<String> {
        validate_partition(kind, &sources, &targets)?;

        let job_id = Uuid::new_v4().to_string();
        let job = ReshardJob::new(
            job_id.clone(),
            kind,
            sources.iter().map(|s| s.id.clone()).collect(),
            targets.iter().map(|s| s.id.clone()).collect(),
        );
        let handle: JobHandle = Arc::new(RwLock::new(job));
        self.jobs.write().await.insert(job_id.clone(), Arc::clone(&handle));

        let tables = tables.unwrap_or_else(|| self.config.default_tables.clone());
        let catalog = Arc::clone(&self.catalog);
        let source = Arc::clone(&self.source);
        let config = self.config.clone();

        // The resharder keeps its own pool registry instance (separate from
        // the router's) since precopy/deltasync run from the manager
        // process, not the data plane.
        let pool_config = self.pool_config.clone();
        tokio::spawn(async move {
            let pools = PoolRegistry::new(pool_config);
            run_job(catalog, pools, source, config, handle, sources, targets, tables).await;
        });

        Ok(job_id)
    }

    pub async fn get_job(&self, id: &str) -> Result<ReshardJob> {
        let handle = {
            let jobs = self.jobs.read().await;
            jobs.get(id).cloned()
        };
        match handle {
            Some(handle) => Ok(handle.read().await.clone()),
            None => Err(Error::NotFound(format!("reshard job {id}"))),
        }
    }
}

/// Split: targets' ranges must partition the source's range exactly. Merge:
/// sources' ranges must be contiguous and together equal the target's range
/// (spec.md 4.5).
fn validate_partition(kind: ReshardKind, sources: &[Shard], targets: &[Shard]) -> Result<()> {
    match kind {
        ReshardKind::Split => {
            let source = sources
                .first()
                .ok_or_else(|| Error::BadRequest("split requires exactly one source shard".into()))?;
            let Some((start, end)) = source.hash_range else {
                return Err(Error::InvariantViolation(format!(
                    "source shard {} has no hash range to split",
                    source.id
                )));
            };
            let mut ranges: Vec<(u64, u64)> = targets
                .iter()
                .map(|t| t.hash_range.ok_or_else(|| {
                    Error::InvariantViolation(format!("target shard {} has no hash range", t.id))
                }))
                .collect::<Result<_>>()?;
            ranges.sort();
            let mut cursor = start;
            for (s, e) in &ranges {
                if *s != cursor {
                    return Err(Error::InvariantViolation(
                        "split targets do not exactly partition the source range".into(),
                    ));
                }
                cursor = e.saturating_add(1);
            }
            if cursor != end.saturating_add(1) {
                return Err(Error::InvariantViolation(
                    "split targets do not exactly partition the source range".into(),
                ));
            }
            Ok(())
        }
        ReshardKind::Merge => {
            let target = targets
                .first()
                .ok_or_else(|| Error::BadRequest("merge requires exactly one target shard".into()))?;
            let Some((tstart, tend)) = target.hash_range else {
                return Err(Error::InvariantViolation(format!(
                    "target shard {} has no hash range",
                    target.id
                )));
            };
            let mut ranges: Vec<(u64, u64)> = sources
                .iter()
                .map(|s| s.hash_range.ok_or_else(|| {
                    Error::InvariantViolation(format!("source shard {} has no hash range", s.id))
                }))
                .collect::<Result<_>>()?;
            ranges.sort();
            let mut cursor = tstart;
            for (s, e) in &ranges {
                if *s != cursor {
                    return Err(Error::InvariantViolation(
                        "merge sources are not contiguous or do not cover the target range".into(),
                    ));
                }
                cursor = e.saturating_add(1);
            }
            if cursor != tend.saturating_add(1) {
                return Err(Error::InvariantViolation(
                    "merge sources are not contiguous or do not cover the target range".into(),
                ));
            }
            Ok(())
        }
    }
}

/// A routing function over ranges first, falling back to a ring built from
/// `targets`, falling back to modulo-by-target-count only when neither
/// covers the key — the same last-resort degraded path as
/// `Catalog::get_shard` (spec.md 4.1, 4.6 ordering rule).
fn target_router(targets: &[Shard]) -> impl Fn(&str) -> Option<ShardId> + Send + Sync {
    let ranged: Vec<(u64, u64, ShardId)> = targets
        .iter()
        .filter_map(|t| t.hash_range.map(|(s, e)| (s, e, t.id.clone())))
        .collect();
    let ring = ConsistentHashRing::rebuild(targets.iter().map(|t| (t.id.clone(), t.vnode_count)));
    let mut sorted_ids: Vec<ShardId> = targets.iter().map(|t| t.id.clone()).collect();
    sorted_ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));

    move |key: &str| {
        let h = crate::hash::hash_key(key);
        if let Some(id) = ranged.iter().find(|(s, e, _)| h >= *s && h <= *e).map(|(_, _, id)| id.clone()) {
            return Some(id);
        }
        if let Some(id) = ring.get_shard_for_hash(h) {
            return Some(id);
        }
        if sorted_ids.is_empty() {
            return None;
        }
        let index = (h % sorted_ids.len() as u64) as usize;
        tracing::warn!(
            key,
            index,
            target_count = sorted_ids.len(),
            "reshard target routing found no range or ring match, falling back to modulo-by-count"
        );
        Some(sorted_ids[index].clone())
    }
}

async fn run_job(
    catalog: Arc<Catalog>,
    pools: PoolRegistry,
    source: Arc<dyn DeltaSyncSource>,
    config: ResharderConfig,
    handle: JobHandle,
    sources: Vec<Shard>,
    targets: Vec<Shard>,
    tables: Vec<String>,
) {
    if let Err(err) = run_job_inner(&catalog, &pools, &source, &config, &handle, &sources, &targets, &tables).await {
        tracing::error!(error = %err, "reshard job failed");
        let mut job = handle.write().await;
        job.status = ReshardJobStatus::Failed;
        job.failure_reason = Some(err.to_string());
        job.completed_at = Some(Utc::now());
    }
}

async fn run_job_inner(
    catalog: &Arc<Catalog>,
    pools: &PoolRegistry,
    source: &Arc<dyn DeltaSyncSource>,
    config: &ResharderConfig,
    handle: &JobHandle,
    sources: &[Shard],
    targets: &[Shard],
    tables: &[String],
) -> Result<()> {
    {
        let mut job = handle.write().await;
        job.status = ReshardJobStatus::Pending;
        job.started_at = Some(Utc::now());
    }

    let route = target_router(targets);
    let mut target_pools = HashMap::new();
    for target in targets {
        let pool = pools.get_or_create(&target.id, &target.primary_endpoint).await?;
        target_pools.insert(target.id.clone(), pool);
    }

    // Phase 1 — precopy (spec.md 4.6).
    set_phase(handle, ReshardJobStatus::Precopy, 0.0).await;
    for src in sources {
        let source_pool = pools.get_or_create(&src.id, &src.primary_endpoint).await?;
        let ctx = ReshardContext {
            source_pool: source_pool.inner(),
            target_pools: &target_pools,
            tables,
            batch_size: config.batch_size,
            route: &route,
            max_retries: config.max_retries,
        };
        let migrated = source.sync(&ctx).await?;
        bump_migrated(handle, migrated).await;
    }
    set_phase(handle, ReshardJobStatus::Precopy, 0.5).await;

    // Phase 2 — deltasync: quiesce sources, re-run the copy loop.
    set_phase(handle, ReshardJobStatus::Deltasync, 0.5).await;
    for src in sources {
        let mut readonly = src.clone();
        readonly.status = ShardStatus::Readonly;
        catalog.update_shard(readonly).await?;
    }
    tokio::time::sleep(config.quiescence).await;
    for src in sources {
        let source_pool = pools.get_or_create(&src.id, &src.primary_endpoint).await?;
        let ctx = ReshardContext {
            source_pool: source_pool.inner(),
            target_pools: &target_pools,
            tables,
            batch_size: config.batch_size,
            route: &route,
            max_retries: config.max_retries,
        };
        let migrated = source.sync(&ctx).await?;
        bump_migrated(handle, migrated).await;
    }
    set_phase(handle, ReshardJobStatus::Deltasync, 0.8).await;

    // Phase 3 — cutover: one catalog transition per shard, sources first
    // then targets, so a mid-failure never exposes targets without sources
    // already demoted.
    set_phase(handle, ReshardJobStatus::Cutover, 0.9).await;
    for src in sources {
        let mut updated = catalog.get_shard_by_id(&src.id).await?;
        updated.status = match targets.first().map(|t| t.id.clone()) {
            Some(_) => ShardStatus::Inactive,
            None => ShardStatus::Readonly,
        };
        catalog.update_shard(updated).await?;
    }
    for target in targets {
        let mut updated = catalog.get_shard_by_id(&target.id).await?;
        updated.status = ShardStatus::Active;
        catalog.update_shard(updated).await?;
    }

    // Phase 4 — validation: ping each target with a representative read.
    set_phase(handle, ReshardJobStatus::Validation, 0.9).await;
    for target in targets {
        let pool = target_pools
            .get(&target.id)
            .ok_or_else(|| Error::InvariantViolation(format!("no pool for target {}", target.id)))?;
        sqlx::query("SELECT 1").fetch_one(pool.inner()).await?;
    }

    let mut job = handle.write().await;
    job.status = ReshardJobStatus::Completed;
    job.progress = 1.0;
    job.completed_at = Some(Utc::now());
    Ok(())
}

async fn set_phase(handle: &JobHandle, status: ReshardJobStatus, progress: f64) {
    let mut job = handle.write().await;
    job.status = status;
    job.progress = progress;
}

async fn bump_migrated(handle: &JobHandle, by: u64) {
    let mut job = handle.write().await;
    job.keys_migrated += by;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc as ChronoUtc;

    fn shard(id: &str, range: Option<(u64, u64)>, vnodes: u32) -> Shard {
        Shard {
            id: ShardId::from(id.to_string()),
            application_id: crate::model::ApplicationId::from("app"),
            name: id.to_string(),
            primary_endpoint: format!("postgres://{id}"),
            replica_endpoints: vec![],
            vnode_count: vnodes,
            hash_range: range,
            status: ShardStatus::Active,
            version: 1,
            created_at: ChronoUtc::now(),
            updated_at: ChronoUtc::now(),
        }
    }

    #[test]
    fn split_requires_targets_to_exactly_partition_source() {
        let source = shard("s1", Some((0, 99)), 32);
        let good_targets = vec![shard("t1", Some((0, 49)), 32), shard("t2", Some((50, 99)), 32)];
        assert!(validate_partition(ReshardKind::Split, &[source.clone()], &good_targets).is_ok());

        let bad_targets = vec![shard("t1", Some((0, 40)), 32), shard("t2", Some((50, 99)), 32)];
        assert!(validate_partition(ReshardKind::Split, &[source], &bad_targets).is_err());
    }

    #[test]
    fn merge_requires_sources_contiguous_and_covering_target() {
        let target = shard("m", Some((0, 99)), 32);
        let good_sources = vec![shard("s1", Some((0, 49)), 32), shard("s2", Some((50, 99)), 32)];
        assert!(validate_partition(ReshardKind::Merge, &good_sources, &[target.clone()]).is_ok());

        let gapped_sources = vec![shard("s1", Some((0, 40)), 32), shard("s2", Some((50, 99)), 32)];
        assert!(validate_partition(ReshardKind::Merge, &gapped_sources, &[target]).is_err());
    }

    #[test]
    fn target_router_prefers_range_containment_over_ring() {
        let targets = vec![shard("t1", Some((0, u64::MAX / 2)), 64), shard("t2", Some((u64::MAX / 2 + 1, u64::MAX)), 64)];
        let route = target_router(&targets);
        let low = route("low-key-a");
        assert!(low.is_some());
    }
}

//! The control plane (spec.md 4.5): application/shard lifecycle, replica
//! promotion, and delegating reshape to the [`crate::resharder::Resharder`].

pub mod probe;

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::model::{
    Application, ApplicationId, ApplicationPolicy, ReshardJob, ReshardKind, Shard, ShardId,
    ShardStatus, DEFAULT_VNODE_COUNT,
};
use crate::resharder::Resharder;

use probe::BackendProbe;

pub struct Manager {
    catalog: Arc<Catalog>,
    resharder: Arc<Resharder>,
    probe: Arc<dyn BackendProbe>,
}

/// Fields accepted when registering an application; identifier and policy
/// are assigned if omitted.
pub struct RegisterApplicationRequest {
    pub name: String,
    pub owner: String,
    pub default_backend_uri: String,
    pub policy: Option<ApplicationPolicy>,
}

/// Fields accepted when creating a shard (spec.md 4.5): vnode count and
/// status default when unset.
pub struct CreateShardRequest {
    pub application_id: ApplicationId,
    pub name: String,
    pub primary_endpoint: String,
    pub replica_endpoints: Vec<String>,
    pub vnode_count: Option<u32>,
    pub hash_range: Option<(u64, u64)>,
    pub status: Option<ShardStatus>,
}

impl Manager {
    pub fn new(catalog: Arc<Catalog>, resharder: Arc<Resharder>, probe: Arc<dyn BackendProbe>) -> Self {
        Self {
            catalog,
            resharder,
            probe,
        }
    }

    // -- Application lifecycle --------------------------------------------

    /// `register_application(name, …)`: validates target backend
    /// reachability via the collaborator ping, then persists (spec.md 4.5).
    pub async fn register_application(&self, request: RegisterApplicationRequest) -> Result<Application> {
        self.probe.ping(&request.default_backend_uri).await?;

        let now = Utc::now();
        let app = Application {
            id: ApplicationId::from(Uuid::new_v4().to_string()),
            name: request.name,
            owner: request.owner,
            default_backend_uri: request.default_backend_uri,
            policy: request.policy.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        self.catalog.create_application(app).await
    }

    pub async fn get_application(&self, id: &ApplicationId) -> Result<Application> {
        self.catalog.get_application(id).await
    }

    pub async fn list_applications(&self) -> Result<Vec<Application>> {
        self.catalog.list_applications().await
    }

    /// `delete_application(id)` fails if any shard still references it
    /// (spec.md 4.5) — enforced inside the catalog, which holds the
    /// authoritative shard list.
    pub async fn delete_application(&self, id: &ApplicationId) -> Result<()> {
        self.catalog.delete_application(id).await
    }

    // -- Shard lifecycle ----------------------------------------------------

    pub async fn create_shard(&self, request: CreateShardRequest) -> Result<Shard> {
        if request.primary_endpoint.is_empty() {
            return Err(Error::BadRequest("primary endpoint must not be empty".into()));
        }
        if request.replica_endpoints.iter().any(|r| r == &request.primary_endpoint) {
            return Err(Error::BadRequest("replica endpoints must differ from the primary".into()));
        }

        let now = Utc::now();
        let shard = Shard {
            id: ShardId::from(Uuid::new_v4().to_string()),
            application_id: request.application_id,
            name: request.name,
            primary_endpoint: request.primary_endpoint,
            replica_endpoints: request.replica_endpoints,
            vnode_count: request.vnode_count.unwrap_or(DEFAULT_VNODE_COUNT),
            hash_range: request.hash_range,
            status: request.status.unwrap_or(ShardStatus::Active),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.catalog.create_shard(shard).await
    }

    pub async fn get_shard(&self, id: &ShardId) -> Result<Shard> {
        self.catalog.get_shard_by_id(id).await
    }

    pub async fn list_shards(&self, app_id: &ApplicationId) -> Result<Vec<Shard>> {
        self.catalog.list_shards(app_id).await
    }

    /// `delete_shard(id)` requires status `inactive` (spec.md 4.5) —
    /// enforced inside the catalog.
    pub async fn delete_shard(&self, id: &ShardId) -> Result<()> {
        self.catalog.delete_shard(id).await
    }

    /// `promote_replica(shard_id, replica_uri)`: atomically swaps primary
    /// with the named replica and bumps version (spec.md 4.5).
    pub async fn promote_replica(&self, shard_id: &ShardId, replica_uri: &str) -> Result<Shard> {
        let mut shard = self.catalog.get_shard_by_id(shard_id).await?;
        let position = shard
            .replica_endpoints
            .iter()
            .position(|r| r == replica_uri)
            .ok_or_else(|| Error::BadRequest(format!("{replica_uri} is not a replica of shard {shard_id}")))?;

        let old_primary = std::mem::replace(&mut shard.primary_endpoint, replica_uri.to_string());
        shard.replica_endpoints[position] = old_primary;
        self.catalog.update_shard(shard).await
    }

    // -- Reshape ------------------------------------------------------------

    /// `split(source, targets[, split_point])`: creates target shards in
    /// `migrating` status and hands the job to the Resharder, returning
    /// immediately with the job id (spec.md 4.5).
    pub async fn split(
        &self,
        source_id: &ShardId,
        targets: Vec<CreateShardRequest>,
        tables: Option<Vec<String>>,
    ) -> Result<ReshardJob> {
        let source = self.catalog.get_shard_by_id(source_id).await?;
        let created_targets = self.create_migrating_targets(&source.application_id, targets).await?;
        let job_id = self
            .resharder
            .start_job(ReshardKind::Split, vec![source], created_targets, tables)
            .await?;
        self.resharder.get_job(&job_id).await
    }

    /// `merge(sources[], target)`: same contract as split, with a single
    /// target shard consuming several sources (spec.md 4.5).
    pub async fn merge(
        &self,
        source_ids: Vec<ShardId>,
        target: CreateShardRequest,
        tables: Option<Vec<String>>,
    ) -> Result<ReshardJob> {
        let mut sources = Vec::with_capacity(source_ids.len());
        for id in &source_ids {
            sources.push(self.catalog.get_shard_by_id(id).await?);
        }
        let application_id = sources
            .first()
            .map(|s| s.application_id.clone())
            .ok_or_else(|| Error::BadRequest("merge requires at least one source shard".into()))?;
        let created_targets = self
            .create_migrating_targets(&application_id, vec![target])
            .await?;
        let job_id = self
            .resharder
            .start_job(ReshardKind::Merge, sources, created_targets, tables)
            .await?;
        self.resharder.get_job(&job_id).await
    }

    pub async fn get_reshard_job(&self, id: &str) -> Result<ReshardJob> {
        self.resharder.get_job(id).await
    }

    async fn create_migrating_targets(
        &self,
        application_id: &ApplicationId,
        targets: Vec<CreateShardRequest>,
    ) -> Result<Vec<Shard>> {
        let mut created = Vec::with_capacity(targets.len());
        for mut request in targets {
            request.application_id = application_id.clone();
            request.status = Some(ShardStatus::Migrating);
            created.push(self.create_shard(request).await?);
        }
        Ok(created)
    }
}

//! The metadata catalog (spec.md 4.2): the source of truth for applications
//! and shards, and the owner of the per-application ring cache that the
//! Router and Smart Client resolve keys against.

pub mod etcd_store;
pub mod memory_store;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};

use crate::error::{Error, Result};
use crate::hash::hash_key;
use crate::model::{Application, ApplicationId, Shard, ShardId, ShardStatus};
use crate::ring::ConsistentHashRing;

use store::{app_key, decode, encode, shard_key, CatalogStore, WatchEvent, APPS_PREFIX, SHARDS_PREFIX};

/// A consistent view of the catalog, published on every externally observed
/// mutation (spec.md 4.2 `watch()`: "guarantees monotone catalog-version").
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub version: u64,
}

struct RingCache {
    rings: HashMap<ApplicationId, ConsistentHashRing>,
}

impl RingCache {
    fn new() -> Self {
        Self {
            rings: HashMap::new(),
        }
    }

    fn ring_for(&mut self, app_id: &ApplicationId) -> &mut ConsistentHashRing {
        self.rings
            .entry(app_id.clone())
            .or_insert_with(ConsistentHashRing::new)
    }
}

/// The catalog service (spec.md 4.2). Wraps a [`CatalogStore`] and maintains
/// a per-application [`ConsistentHashRing`] rebuilt from shard records, never
/// persisted on its own.
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
    rings: RwLock<RingCache>,
    version: RwLock<u64>,
    snapshots: broadcast::Sender<CatalogSnapshot>,
}

impl Catalog {
    /// Perform the full range read described in spec.md 4.2: load every
    /// `/apps/` and `/shards/` record, rebuild each application's ring, and
    /// adopt the store's revision as the initial catalog-version.
    pub async fn load(store: Arc<dyn CatalogStore>) -> Result<Arc<Self>> {
        let shard_records = store.list_prefix(SHARDS_PREFIX).await?;
        let revision = store.current_revision().await?;

        let mut rings = RingCache::new();
        for record in &shard_records {
            let shard: Shard = decode(&record.value)?;
            if shard.status.serves_reads() || shard.status == ShardStatus::Migrating {
                rings
                    .ring_for(&shard.application_id)
                    .add_shard(&shard.id, shard.vnode_count);
            }
        }

        let (tx, _rx) = broadcast::channel(1024);
        let catalog = Arc::new(Self {
            store,
            rings: RwLock::new(rings),
            version: RwLock::new(revision),
            snapshots: tx,
        });
        catalog.spawn_watch_bridge();
        Ok(catalog)
    }

    /// Forward the underlying store's watch stream into catalog snapshots,
    /// so every externally observed mutation (e.g. from another process)
    /// bumps the cached version exactly like a local write would.
    fn spawn_watch_bridge(self: &Arc<Self>) {
        let catalog = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = match catalog.store.watch().await {
                Ok(rx) => rx,
                Err(err) => {
                    tracing::warn!(error = %err, "catalog watch bridge failed to start");
                    return;
                }
            };
            loop {
                match rx.recv().await {
                    Ok(event) => catalog.absorb_watch_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "catalog watch bridge lagged, snapshot only");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn absorb_watch_event(&self, event: WatchEvent) {
        let (key, revision) = match &event {
            WatchEvent::Put(record) => (record.key.clone(), record.revision),
            WatchEvent::Delete { key, revision } => (key.clone(), *revision),
        };
        if let WatchEvent::Put(record) = &event {
            if key.starts_with(SHARDS_PREFIX) {
                if let Ok(shard) = decode::<Shard>(&record.value) {
                    let mut rings = self.rings.write().await;
                    rings.ring_for(&shard.application_id).remove_shard(&shard.id);
                    if shard.status.serves_reads() || shard.status == ShardStatus::Migrating {
                        rings
                            .ring_for(&shard.application_id)
                            .add_shard(&shard.id, shard.vnode_count);
                    }
                }
            }
        }
        self.bump_version(revision).await;
    }

    async fn bump_version(&self, at_least: u64) {
        let mut version = self.version.write().await;
        if at_least > *version {
            *version = at_least;
        }
        let _ = self.snapshots.send(CatalogSnapshot { version: *version });
    }

    pub async fn version(&self) -> u64 {
        *self.version.read().await
    }

    /// Lazy, restartable stream of catalog snapshots (spec.md 4.2).
    pub fn watch(&self) -> broadcast::Receiver<CatalogSnapshot> {
        self.snapshots.subscribe()
    }

    // -- Applications --------------------------------------------------

    pub async fn create_application(&self, app: Application) -> Result<Application> {
        let key = app_key(app.id.as_str());
        let created = self.store.create(&key, encode(&app)?).await?;
        if !created {
            return Err(Error::AlreadyExists(format!("application {}", app.id)));
        }
        let revision = self.store.current_revision().await?;
        self.bump_version(revision).await;
        Ok(app)
    }

    pub async fn get_application(&self, id: &ApplicationId) -> Result<Application> {
        let key = app_key(id.as_str());
        let records = self.store.list_prefix(&key).await?;
        records
            .into_iter()
            .find(|r| r.key == key)
            .map(|r| decode(&r.value))
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("application {id}")))
    }

    pub async fn list_applications(&self) -> Result<Vec<Application>> {
        let records = self.store.list_prefix(APPS_PREFIX).await?;
        records.iter().map(|r| decode(&r.value)).collect()
    }

    pub async fn delete_application(&self, id: &ApplicationId) -> Result<()> {
        let still_referenced = self
            .list_shards(id)
            .await?
            .iter()
            .any(|s| s.status != ShardStatus::Inactive);
        if still_referenced {
            return Err(Error::InUse(format!("application {id} has active shards")));
        }
        self.store.delete(&app_key(id.as_str())).await?;
        let revision = self.store.current_revision().await?;
        self.bump_version(revision).await;
        Ok(())
    }

    // -- Shards -----------------------------------------------------------

    /// `create_shard(shard)`: fails with `AlreadyExists` if the id is
    /// present; atomically persists and updates the ring; bumps
    /// catalog-version (spec.md 4.2).
    pub async fn create_shard(&self, shard: Shard) -> Result<Shard> {
        let key = shard_key(shard.id.as_str());
        let created = self.store.create(&key, encode(&shard)?).await?;
        if !created {
            return Err(Error::AlreadyExists(format!("shard {}", shard.id)));
        }
        {
            let mut rings = self.rings.write().await;
            if shard.status.serves_reads() || shard.status == ShardStatus::Migrating {
                rings
                    .ring_for(&shard.application_id)
                    .add_shard(&shard.id, shard.vnode_count);
            }
        }
        let revision = self.store.current_revision().await?;
        self.bump_version(revision).await;
        Ok(shard)
    }

    /// `update_shard(shard)`: requires existing id; bumps shard version and
    /// catalog-version (spec.md 4.2).
    pub async fn update_shard(&self, mut shard: Shard) -> Result<Shard> {
        let existing = self.get_shard_by_id(&shard.id).await?;
        shard.version = existing.version + 1;
        shard.updated_at = Utc::now();

        let key = shard_key(shard.id.as_str());
        self.store.put(&key, encode(&shard)?).await?;

        {
            let mut rings = self.rings.write().await;
            let ring = rings.ring_for(&shard.application_id);
            ring.remove_shard(&shard.id);
            if shard.status.serves_reads() || shard.status == ShardStatus::Migrating {
                ring.add_shard(&shard.id, shard.vnode_count);
            }
        }
        let revision = self.store.current_revision().await?;
        self.bump_version(revision).await;
        Ok(shard)
    }

    /// `delete_shard(id)`: fails with `InUse` if status != `inactive`;
    /// removes from ring (spec.md 4.2).
    pub async fn delete_shard(&self, id: &ShardId) -> Result<()> {
        let shard = self.get_shard_by_id(id).await?;
        if shard.status != ShardStatus::Inactive {
            return Err(Error::InUse(format!("shard {id} is not inactive")));
        }
        self.store.delete(&shard_key(id.as_str())).await?;
        {
            let mut rings = self.rings.write().await;
            rings.ring_for(&shard.application_id).remove_shard(id);
        }
        let revision = self.store.current_revision().await?;
        self.bump_version(revision).await;
        Ok(())
    }

    /// `get_shard(key, app_id)`: range form first, then the ring, then —
    /// only when neither covers the key — modulo-by-active-shard-count as a
    /// logged degraded condition (spec.md 4.1). Fails with `NotFound` if the
    /// application has no active shards at all.
    pub async fn get_shard(&self, key: &str, app_id: &ApplicationId) -> Result<Shard> {
        let hash = hash_key(key);
        let mut active_shards = self.list_shards(app_id).await?;
        active_shards.retain(|s| s.status.serves_reads());

        if let Some(shard) = active_shards.iter().find(|s| s.range_contains(hash)) {
            return Ok(shard.clone());
        }

        let shard_id = {
            let mut rings = self.rings.write().await;
            rings.ring_for(app_id).get_shard_for_hash(hash)
        };
        if let Some(shard_id) = shard_id {
            return self.get_shard_by_id(&shard_id).await;
        }

        if active_shards.is_empty() {
            return Err(Error::NotFound(format!("no active shards for application {app_id}")));
        }

        active_shards.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        let index = (hash % active_shards.len() as u64) as usize;
        tracing::warn!(
            %app_id,
            index,
            shard_count = active_shards.len(),
            "no range or ring match for key, falling back to modulo-by-shard-count routing"
        );
        Ok(active_shards.swap_remove(index))
    }

    pub async fn get_shard_by_id(&self, id: &ShardId) -> Result<Shard> {
        let key = shard_key(id.as_str());
        let records = self.store.list_prefix(&key).await?;
        records
            .into_iter()
            .find(|r| r.key == key)
            .map(|r| decode(&r.value))
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("shard {id}")))
    }

    pub async fn list_shards(&self, app_id: &ApplicationId) -> Result<Vec<Shard>> {
        let records = self.store.list_prefix(SHARDS_PREFIX).await?;
        let mut shards = Vec::new();
        for record in records {
            let shard: Shard = decode(&record.value)?;
            if &shard.application_id == app_id {
                shards.push(shard);
            }
        }
        Ok(shards)
    }
}

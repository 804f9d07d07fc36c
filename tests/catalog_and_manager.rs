//! Scenario tests from spec.md 8: application/shard lifecycle, the InUse
//! delete guard, single/empty-shard routing boundaries, replica promotion
//! and the concurrent create_shard race.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use shardkeeper::catalog::memory_store::InMemoryCatalogStore;
use shardkeeper::catalog::Catalog;
use shardkeeper::config::PoolConfig;
use shardkeeper::error::{Error, Result};
use shardkeeper::manager::probe::BackendProbe;
use shardkeeper::manager::{CreateShardRequest, Manager, RegisterApplicationRequest};
use shardkeeper::model::ShardStatus;
use shardkeeper::resharder::source::{DeltaSyncSource, ReshardContext};
use shardkeeper::resharder::{Resharder, ResharderConfig};

struct AlwaysReachable;

#[async_trait]
impl BackendProbe for AlwaysReachable {
    async fn ping(&self, _endpoint: &str) -> Result<()> {
        Ok(())
    }
}

struct UnusedSync;

#[async_trait]
impl DeltaSyncSource for UnusedSync {
    async fn sync(&self, _ctx: &ReshardContext<'_>) -> Result<u64> {
        unreachable!("these scenarios never reach a reshard job")
    }
}

fn test_pool_config() -> PoolConfig {
    PoolConfig {
        max_open: 1,
        min_idle: 0,
        acquire_timeout: Duration::from_millis(10),
        idle_timeout: Duration::from_secs(1),
        max_lifetime: Duration::from_secs(1),
    }
}

async fn test_manager() -> (Arc<Catalog>, Manager) {
    let store = InMemoryCatalogStore::new();
    let catalog = Catalog::load(store).await.unwrap();
    let resharder = Arc::new(Resharder::new(
        Arc::clone(&catalog),
        test_pool_config(),
        Arc::new(UnusedSync),
        ResharderConfig {
            batch_size: 100,
            quiescence: Duration::from_millis(1),
            max_retries: 1,
            default_tables: vec!["rows".to_string()],
        },
    ));
    let manager = Manager::new(Arc::clone(&catalog), resharder, Arc::new(AlwaysReachable));
    (catalog, manager)
}

#[tokio::test]
async fn create_shard_routes_key_and_guards_delete_while_active() {
    let (catalog, manager) = test_manager().await;

    let app = manager
        .register_application(RegisterApplicationRequest {
            name: "app1".into(),
            owner: "team-x".into(),
            default_backend_uri: "postgres://primary/app1".into(),
            policy: None,
        })
        .await
        .unwrap();

    let shard = manager
        .create_shard(CreateShardRequest {
            application_id: app.id.clone(),
            name: "s1".into(),
            primary_endpoint: "postgres://s1-primary".into(),
            replica_endpoints: vec![],
            vnode_count: Some(2),
            hash_range: Some((0, u64::MAX)),
            status: None,
        })
        .await
        .unwrap();
    assert_eq!(shard.status, ShardStatus::Active);

    let resolved = catalog.get_shard("user-123", &app.id).await.unwrap();
    assert_eq!(resolved.id, shard.id);

    let err = manager.delete_shard(&shard.id).await.unwrap_err();
    assert!(matches!(err, Error::InUse(_)));
}

#[tokio::test]
async fn empty_application_has_no_shard() {
    let (catalog, manager) = test_manager().await;
    let app = manager
        .register_application(RegisterApplicationRequest {
            name: "empty-app".into(),
            owner: "team-x".into(),
            default_backend_uri: "postgres://primary/empty".into(),
            policy: None,
        })
        .await
        .unwrap();

    let err = catalog.get_shard("any-key", &app.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn single_shard_serves_every_key() {
    let (catalog, manager) = test_manager().await;
    let app = manager
        .register_application(RegisterApplicationRequest {
            name: "single-shard-app".into(),
            owner: "team-x".into(),
            default_backend_uri: "postgres://primary/single".into(),
            policy: None,
        })
        .await
        .unwrap();
    let shard = manager
        .create_shard(CreateShardRequest {
            application_id: app.id.clone(),
            name: "only".into(),
            primary_endpoint: "postgres://only-primary".into(),
            replica_endpoints: vec![],
            vnode_count: Some(16),
            hash_range: None,
            status: None,
        })
        .await
        .unwrap();

    for i in 0..200 {
        let key = format!("key-{i}");
        let resolved = catalog.get_shard(&key, &app.id).await.unwrap();
        assert_eq!(resolved.id, shard.id);
    }
}

#[tokio::test]
async fn promoting_a_replica_swaps_primary_and_demotes_it() {
    let (_, manager) = test_manager().await;
    let app = manager
        .register_application(RegisterApplicationRequest {
            name: "promote-app".into(),
            owner: "team-x".into(),
            default_backend_uri: "postgres://primary/promote".into(),
            policy: None,
        })
        .await
        .unwrap();
    let shard = manager
        .create_shard(CreateShardRequest {
            application_id: app.id.clone(),
            name: "s1".into(),
            primary_endpoint: "postgres://s1-primary".into(),
            replica_endpoints: vec!["postgres://s1-replica".into()],
            vnode_count: Some(8),
            hash_range: None,
            status: None,
        })
        .await
        .unwrap();

    let promoted = manager
        .promote_replica(&shard.id, "postgres://s1-replica")
        .await
        .unwrap();

    assert_eq!(promoted.primary_endpoint, "postgres://s1-replica");
    assert_eq!(promoted.replica_endpoints, vec!["postgres://s1-primary".to_string()]);
    assert_eq!(promoted.version, shard.version + 1);
}

#[tokio::test]
async fn concurrent_create_shard_with_same_id_yields_one_winner_and_one_version_bump() {
    let (catalog, manager) = test_manager().await;
    let app = manager
        .register_application(RegisterApplicationRequest {
            name: "race-app".into(),
            owner: "team-x".into(),
            default_backend_uri: "postgres://primary/race".into(),
            policy: None,
        })
        .await
        .unwrap();

    let shard_id = shardkeeper::model::ShardId::from("contested-shard".to_string());
    let before_version = catalog.version().await;

    let make_shard = || shardkeeper::model::Shard {
        id: shard_id.clone(),
        application_id: app.id.clone(),
        name: "contested".into(),
        primary_endpoint: "postgres://contested-primary".into(),
        replica_endpoints: vec![],
        vnode_count: 8,
        hash_range: None,
        status: ShardStatus::Active,
        version: 1,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };

    let catalog_a = Arc::clone(&catalog);
    let catalog_b = Arc::clone(&catalog);
    let (result_a, result_b) = tokio::join!(
        catalog_a.create_shard(make_shard()),
        catalog_b.create_shard(make_shard()),
    );

    let outcomes = [result_a.is_ok(), result_b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1, "exactly one create_shard should win");

    let after_version = catalog.version().await;
    assert_eq!(after_version, before_version + 1);
}

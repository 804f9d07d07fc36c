//! Control-plane binary: loads config, rebuilds the catalog from the
//! metadata store, and serves the Manager HTTP API (spec.md 6).

use std::sync::Arc;

use axum::middleware;
use tokio::net::TcpListener;
use tower::ServiceBuilder;

use shardkeeper::catalog::etcd_store::EtcdCatalogStore;
use shardkeeper::catalog::Catalog;
use shardkeeper::config::ManagerConfig;
use shardkeeper::http::{auth::require_bearer_token, auth_state, cors_layer, manager as manager_http};
use shardkeeper::manager::probe::SqlxBackendProbe;
use shardkeeper::manager::Manager;
use shardkeeper::resharder::source::BulkCopyDeltaSync;
use shardkeeper::resharder::{Resharder, ResharderConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ManagerConfig::from_env()?;

    let store = Arc::new(EtcdCatalogStore::connect(&config.catalog.endpoints, config.auth.token.as_deref()).await?);
    let catalog = Catalog::load(store).await?;

    let resharder = Arc::new(Resharder::new(
        Arc::clone(&catalog),
        config.pool.clone(),
        Arc::new(BulkCopyDeltaSync),
        ResharderConfig {
            batch_size: config.reshard_batch_size,
            quiescence: config.reshard_quiescence,
            max_retries: config.reshard_max_retries,
            default_tables: config.reshard_default_tables.clone(),
        },
    ));

    let manager = Arc::new(Manager::new(catalog, resharder, Arc::new(SqlxBackendProbe)));

    let app = manager_http::router(manager)
        .layer(middleware::from_fn_with_state(auth_state(&config.auth), require_bearer_token))
        .layer(ServiceBuilder::new().layer(cors_layer()));

    let listener = TcpListener::bind(config.server.address()).await?;
    tracing::info!(address = %config.server.address(), "manager listening");
    axum::serve(listener, app).await?;
    Ok(())
}

//! Data-plane binary: loads config, rebuilds the catalog from the metadata
//! store, and serves the stateless Router HTTP API (spec.md 6).

use std::sync::Arc;

use axum::middleware;
use tokio::net::TcpListener;
use tower::ServiceBuilder;

use shardkeeper::catalog::etcd_store::EtcdCatalogStore;
use shardkeeper::catalog::Catalog;
use shardkeeper::config::RouterConfig;
use shardkeeper::http::{auth::require_bearer_token, auth_state, cors_layer, router as router_http};
use shardkeeper::pool::PoolRegistry;
use shardkeeper::router::policy::PolicyEngine;
use shardkeeper::router::Router as QueryDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RouterConfig::from_env()?;

    let store = Arc::new(EtcdCatalogStore::connect(&config.catalog.endpoints, config.auth.token.as_deref()).await?);
    let catalog = Catalog::load(store).await?;

    let pools = PoolRegistry::new(config.pool.clone());
    let policy = PolicyEngine::new(config.default_rate_limit_per_sec);
    let dispatcher = QueryDispatcher::new(catalog, pools, policy);

    let app = router_http::router(dispatcher)
        .layer(middleware::from_fn_with_state(auth_state(&config.auth), require_bearer_token))
        .layer(ServiceBuilder::new().layer(cors_layer()));

    let listener = TcpListener::bind(config.server.address()).await?;
    tracing::info!(address = %config.server.address(), "router listening");
    axum::serve(listener, app).await?;
    Ok(())
}

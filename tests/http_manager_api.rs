//! Exercises the control-plane HTTP surface (spec.md 6) end to end through
//! the axum router, without a listening socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use shardkeeper::catalog::memory_store::InMemoryCatalogStore;
use shardkeeper::catalog::Catalog;
use shardkeeper::config::PoolConfig;
use shardkeeper::error::Result;
use shardkeeper::manager::probe::BackendProbe;
use shardkeeper::manager::Manager;
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
        unreachable!("not exercised over HTTP in this suite")
    }
}

async fn test_app() -> axum::Router {
    let store = InMemoryCatalogStore::new();
    let catalog = Catalog::load(store).await.unwrap();
    let resharder = Arc::new(Resharder::new(
        Arc::clone(&catalog),
        PoolConfig {
            max_open: 1,
            min_idle: 0,
            acquire_timeout: Duration::from_millis(10),
            idle_timeout: Duration::from_secs(1),
            max_lifetime: Duration::from_secs(1),
        },
        Arc::new(UnusedSync),
        ResharderConfig {
            batch_size: 100,
            quiescence: Duration::from_millis(1),
            max_retries: 1,
            default_tables: vec!["rows".to_string()],
        },
    ));
    let manager = Arc::new(Manager::new(catalog, resharder, Arc::new(AlwaysReachable)));
    shardkeeper::http::manager::router(manager)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn register_list_and_delete_application() {
    let app = test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/applications",
            serde_json::json!({
                "name": "storefront",
                "owner": "team-checkout",
                "default_backend_uri": "postgres://primary/storefront",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let app_id = created["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/v1/applications").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let list = body_json(response).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["id"], app_id);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/applications/{app_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn create_shard_then_reject_delete_while_active_over_http() {
    let app = test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/applications",
            serde_json::json!({
                "name": "ledger",
                "owner": "team-payments",
                "default_backend_uri": "postgres://primary/ledger",
            }),
        ))
        .await
        .unwrap();
    let app_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/shards",
            serde_json::json!({
                "application_id": app_id,
                "name": "s1",
                "primary_endpoint": "postgres://s1-primary",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let shard = body_json(response).await;
    let shard_id = shard["id"].as_str().unwrap().to_string();
    assert_eq!(shard["status"], "active");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/shards/{shard_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let error = body_json(response).await;
    assert_eq!(error["error"]["code"], "IN_USE");
}

#[tokio::test]
async fn bearer_auth_rejects_missing_token_when_enabled() {
    use axum::middleware;
    use shardkeeper::config::AuthConfig;
    use shardkeeper::http::{auth::require_bearer_token, auth_state};

    let auth = AuthConfig {
        token: Some("s3cr3t".to_string()),
    };
    let app = test_app()
        .await
        .layer(middleware::from_fn_with_state(auth_state(&auth), require_bearer_token));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/v1/applications").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/applications")
                .header("authorization", "Bearer s3cr3t")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

//! Data-plane HTTP API (spec.md 6): `/v1/execute` and `/v1/shard-for-key`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{ApplicationId, QueryRequest, QueryResponse};
use crate::router::Router;

use super::auth::application_id_from_headers;

pub fn router(dispatcher: Arc<Router>) -> AxumRouter {
    AxumRouter::new()
        .route("/v1/execute", post(execute))
        .route("/v1/shard-for-key", get(shard_for_key))
        .with_state(dispatcher)
}

fn require_app_id(headers: &HeaderMap) -> Result<ApplicationId> {
    application_id_from_headers(headers)
        .map(ApplicationId::from)
        .ok_or_else(|| Error::BadRequest("missing X-Client-App-ID header".into()))
}

async fn execute(
    State(dispatcher): State<Arc<Router>>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let app_id = require_app_id(&headers)?;
    Ok(Json(dispatcher.execute(request, &app_id).await?))
}

#[derive(Deserialize)]
struct ShardForKeyQuery {
    key: String,
}

#[derive(Serialize)]
struct ShardForKeyResponse {
    shard_id: String,
}

async fn shard_for_key(
    State(dispatcher): State<Arc<Router>>,
    headers: HeaderMap,
    Query(query): Query<ShardForKeyQuery>,
) -> Result<Json<ShardForKeyResponse>> {
    let app_id = require_app_id(&headers)?;
    let shard = dispatcher.catalog().get_shard(&query.key, &app_id).await?;
    Ok(Json(ShardForKeyResponse {
        shard_id: shard.id.to_string(),
    }))
}

//! Control-plane HTTP API (spec.md 6): thin adapters over [`Manager`]
//! operations, JSON bodies with snake_case fields.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::Result;
use crate::manager::{CreateShardRequest as ManagerCreateShardRequest, Manager, RegisterApplicationRequest};
use crate::model::{Application, ApplicationId, ReshardJob, Shard, ShardId, ShardStatus};

pub fn router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/api/v1/applications", post(register_application).get(list_applications))
        .route("/api/v1/applications/{id}", delete(delete_application))
        .route("/api/v1/shards", get(list_shards).post(create_shard))
        .route("/api/v1/shards/{id}", get(get_shard).delete(delete_shard))
        .route("/api/v1/shards/{id}/promote", post(promote_replica))
        .route("/api/v1/reshard/split", post(start_split))
        .route("/api/v1/reshard/merge", post(start_merge))
        .route("/api/v1/reshard/jobs/{id}", get(get_reshard_job))
        .with_state(manager)
}

#[derive(Deserialize)]
struct RegisterApplicationBody {
    name: String,
    owner: String,
    default_backend_uri: String,
}

async fn register_application(
    State(manager): State<Arc<Manager>>,
    Json(body): Json<RegisterApplicationBody>,
) -> Result<(StatusCode, Json<Application>)> {
    let app = manager
        .register_application(RegisterApplicationRequest {
            name: body.name,
            owner: body.owner,
            default_backend_uri: body.default_backend_uri,
            policy: None,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(app)))
}

async fn list_applications(State(manager): State<Arc<Manager>>) -> Result<Json<Vec<Application>>> {
    Ok(Json(manager.list_applications().await?))
}

async fn delete_application(State(manager): State<Arc<Manager>>, Path(id): Path<String>) -> Result<StatusCode> {
    manager.delete_application(&ApplicationId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ListShardsQuery {
    app: String,
}

async fn list_shards(
    State(manager): State<Arc<Manager>>,
    Query(query): Query<ListShardsQuery>,
) -> Result<Json<Vec<Shard>>> {
    Ok(Json(manager.list_shards(&ApplicationId::from(query.app)).await?))
}

#[derive(Deserialize)]
struct CreateShardBody {
    application_id: String,
    name: String,
    primary_endpoint: String,
    #[serde(default)]
    replica_endpoints: Vec<String>,
    vnode_count: Option<u32>,
    hash_range: Option<(u64, u64)>,
    status: Option<ShardStatus>,
}

async fn create_shard(
    State(manager): State<Arc<Manager>>,
    Json(body): Json<CreateShardBody>,
) -> Result<(StatusCode, Json<Shard>)> {
    let shard = manager
        .create_shard(ManagerCreateShardRequest {
            application_id: ApplicationId::from(body.application_id),
            name: body.name,
            primary_endpoint: body.primary_endpoint,
            replica_endpoints: body.replica_endpoints,
            vnode_count: body.vnode_count,
            hash_range: body.hash_range,
            status: body.status,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(shard)))
}

async fn get_shard(State(manager): State<Arc<Manager>>, Path(id): Path<String>) -> Result<Json<Shard>> {
    Ok(Json(manager.get_shard(&ShardId::from(id)).await?))
}

async fn delete_shard(State(manager): State<Arc<Manager>>, Path(id): Path<String>) -> Result<StatusCode> {
    manager.delete_shard(&ShardId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct PromoteReplicaBody {
    replica_uri: String,
}

async fn promote_replica(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
    Json(body): Json<PromoteReplicaBody>,
) -> Result<Json<Shard>> {
    Ok(Json(
        manager.promote_replica(&ShardId::from(id), &body.replica_uri).await?,
    ))
}

#[derive(Deserialize)]
struct SplitBody {
    source: String,
    targets: Vec<CreateShardBody>,
    #[serde(default)]
    tables: Option<Vec<String>>,
}

async fn start_split(
    State(manager): State<Arc<Manager>>,
    Json(body): Json<SplitBody>,
) -> Result<(StatusCode, Json<ReshardJob>)> {
    let targets = body
        .targets
        .into_iter()
        .map(|t| ManagerCreateShardRequest {
            application_id: ApplicationId::from(t.application_id),
            name: t.name,
            primary_endpoint: t.primary_endpoint,
            replica_endpoints: t.replica_endpoints,
            vnode_count: t.vnode_count,
            hash_range: t.hash_range,
            status: t.status,
        })
        .collect();
    let job = manager.split(&ShardId::from(body.source), targets, body.tables).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Deserialize)]
struct MergeBody {
    sources: Vec<String>,
    target: CreateShardBody,
    #[serde(default)]
    tables: Option<Vec<String>>,
}

async fn start_merge(
    State(manager): State<Arc<Manager>>,
    Json(body): Json<MergeBody>,
) -> Result<(StatusCode, Json<ReshardJob>)> {
    let target = ManagerCreateShardRequest {
        application_id: ApplicationId::from(body.target.application_id),
        name: body.target.name,
        primary_endpoint: body.target.primary_endpoint,
        replica_endpoints: body.target.replica_endpoints,
        vnode_count: body.target.vnode_count,
        hash_range: body.target.hash_range,
        status: body.target.status,
    };
    let sources = body.sources.into_iter().map(ShardId::from).collect();
    let job = manager.merge(sources, target, body.tables).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn get_reshard_job(State(manager): State<Arc<Manager>>, Path(id): Path<String>) -> Result<Json<ReshardJob>> {
    Ok(Json(manager.get_reshard_job(&id).await?))
}

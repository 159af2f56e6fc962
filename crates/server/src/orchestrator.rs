//! Control-plane HTTP API: create, inspect, annotate, and destroy
//! instances.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use chainyard_backend::{InstanceManager, LaunchError};
use chainyard_store::StoreError;
use chainyard_types::{CreateInstanceRequest, InstanceRecord, MetadataValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Response envelope of every orchestrator endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<InstanceRecord>,
}

impl ApiResponse {
    fn success(message: &str, data: Option<InstanceRecord>) -> Json<Self> {
        Json(Self { ok: true, message: message.to_string(), data })
    }

    fn failure(message: &str) -> Json<Self> {
        Json(Self { ok: false, message: message.to_string(), data: None })
    }
}

/// Builds the orchestrator router.
pub fn orchestrator_app(manager: InstanceManager) -> Router {
    Router::new()
        .route("/instances", post(create_instance))
        .route("/instances/{instance_id}", get(get_instance).delete(delete_instance))
        .route("/instances/{instance_id}/metadata", post(update_metadata))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

async fn create_instance(
    State(manager): State<InstanceManager>,
    Json(request): Json<CreateInstanceRequest>,
) -> Json<ApiResponse> {
    info!(instance_id = %request.instance_id, "launching new instance");

    match manager.launch(&request).await {
        Ok(record) => ApiResponse::success("instance launched", Some(record)),
        Err(LaunchError::AlreadyExists) => {
            warn!(instance_id = %request.instance_id, "instance already exists");
            ApiResponse::failure("instance already exists")
        }
        Err(err) => {
            error!(instance_id = %request.instance_id, %err, "failed to launch instance");
            ApiResponse::failure("an internal error occurred")
        }
    }
}

async fn get_instance(
    State(manager): State<InstanceManager>,
    Path(instance_id): Path<String>,
) -> Json<ApiResponse> {
    match manager.store().get(&instance_id).await {
        Ok(Some(record)) => ApiResponse::success("fetched metadata", Some(record)),
        Ok(None) => ApiResponse::failure("instance does not exist"),
        Err(err) => {
            error!(%instance_id, %err, "failed to fetch instance");
            ApiResponse::failure("an internal error occurred")
        }
    }
}

async fn update_metadata(
    State(manager): State<InstanceManager>,
    Path(instance_id): Path<String>,
    Json(patch): Json<BTreeMap<String, MetadataValue>>,
) -> Json<ApiResponse> {
    let patch: BTreeMap<String, serde_json::Value> = patch
        .into_iter()
        .map(|(key, value)| (key, serde_json::to_value(value).expect("metadata value is json")))
        .collect();

    match manager.store().update_metadata(&instance_id, &patch).await {
        Ok(()) => ApiResponse::success("metadata updated", None),
        Err(StoreError::UnknownInstance) => ApiResponse::failure("instance does not exist"),
        Err(err) => {
            error!(%instance_id, %err, "failed to update metadata");
            ApiResponse::failure("an internal error occurred")
        }
    }
}

async fn delete_instance(
    State(manager): State<InstanceManager>,
    Path(instance_id): Path<String>,
) -> Json<ApiResponse> {
    info!(%instance_id, "killing instance");

    match manager.kill(&instance_id).await {
        Ok(Some(_)) => ApiResponse::success("instance deleted", None),
        Ok(None) => ApiResponse::failure("no instance found"),
        Err(err) => {
            error!(%instance_id, %err, "failed to kill instance");
            ApiResponse::failure("an internal error occurred")
        }
    }
}

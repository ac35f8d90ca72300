use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::AppState;
use crate::db::features::{self, FeatureUpdate};
use crate::error::Result;
use crate::models::{FeatureConfiguration, FeatureKind};
use crate::refine::{EndpointDoc, describe_endpoints};
use crate::routes::identity::CallerId;

#[derive(Debug, Deserialize)]
pub struct CreateFeatureRequest {
    pub name: String,
    #[serde(alias = "feature_type", alias = "type")]
    pub kind: FeatureKind,
    #[serde(default, alias = "config")]
    pub configuration: Value,
}

#[derive(Debug, Deserialize)]
pub struct EndpointsParams {
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EndpointsResponse {
    pub feature_id: u64,
    pub base_url: String,
    pub endpoints: Vec<EndpointDoc>,
}

/// Create a feature in a project
pub async fn create_feature(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(project_id): Path<String>,
    Json(payload): Json<CreateFeatureRequest>,
) -> Result<(StatusCode, Json<FeatureConfiguration>)> {
    let db = state.db.clone();
    let feature = tokio::task::spawn_blocking(move || {
        features::create_feature(
            &db,
            &project_id,
            &payload.name,
            payload.kind,
            payload.configuration,
        )
    })
    .await??;

    tracing::info!("User {} created feature {}", user_id, feature.id);
    Ok((StatusCode::CREATED, Json(feature)))
}

/// List a project's features in creation order
pub async fn list_features(
    State(state): State<AppState>,
    CallerId(_): CallerId,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<FeatureConfiguration>>> {
    let db = state.db.clone();
    let features =
        tokio::task::spawn_blocking(move || features::list_features(&db, &project_id)).await??;
    Ok(Json(features))
}

/// Replace a feature's name and/or configuration
pub async fn update_feature(
    State(state): State<AppState>,
    CallerId(_): CallerId,
    Path(feature_id): Path<u64>,
    Json(update): Json<FeatureUpdate>,
) -> Result<Json<FeatureConfiguration>> {
    let db = state.db.clone();
    let feature =
        tokio::task::spawn_blocking(move || features::update_feature(&db, feature_id, update))
            .await??;
    Ok(Json(feature))
}

pub async fn delete_feature(
    State(state): State<AppState>,
    CallerId(_): CallerId,
    Path(feature_id): Path<u64>,
) -> Result<Json<Value>> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || features::delete_feature(&db, feature_id)).await??;
    Ok(Json(json!({ "message": "Feature deleted" })))
}

/// Example requests for the routes a feature exposes
///
/// `base_url` defaults to this server's `/api` prefix.
pub async fn feature_endpoints(
    State(state): State<AppState>,
    CallerId(_): CallerId,
    Path(feature_id): Path<u64>,
    Query(params): Query<EndpointsParams>,
) -> Result<Json<EndpointsResponse>> {
    let db = state.db.clone();
    let feature =
        tokio::task::spawn_blocking(move || features::get_feature(&db, feature_id)).await??;

    let base_url = params
        .base_url
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| format!("http://localhost:{}/api", state.config.server_port));

    Ok(Json(EndpointsResponse {
        feature_id,
        endpoints: describe_endpoints(&feature, &base_url),
        base_url,
    }))
}

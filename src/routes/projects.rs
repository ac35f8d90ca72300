use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use redb::WriteTransaction;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::db::features;
use crate::error::Result;
use crate::generator::{self, FileMap, GeneratedFile};
use crate::models::{FeatureConfiguration, ProjectInfo, naming::slugify};
use crate::refine::merge_features;
use crate::routes::identity::CallerId;
use crate::sync::sync_project;

#[derive(Debug, Deserialize)]
pub struct RefineRequest {
    #[serde(default)]
    pub features: Vec<FeatureConfiguration>,
}

#[derive(Debug, Serialize)]
pub struct RefineResponse {
    pub features: Vec<FeatureConfiguration>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub project: ProjectInfo,
    pub digest: String,
    pub files: Vec<GeneratedFile>,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub files: FileMap,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub updated: Vec<String>,
    pub message: String,
}

/// Persist every feature in one transaction, keeping the project id
fn save_all(
    txn: &WriteTransaction,
    project_id: &str,
    batch: Vec<FeatureConfiguration>,
) -> Result<Vec<FeatureConfiguration>> {
    batch
        .into_iter()
        .map(|mut feature| {
            feature.project_id = project_id.to_string();
            features::save_feature(txn, feature)
        })
        .collect()
}

/// Fold a proposed feature set into the project's features
///
/// Proposals with an existing kind and name replace that feature's
/// configuration; AUTH proposals always merge into the single AUTH feature.
pub async fn refine_project(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(project_id): Path<String>,
    Json(payload): Json<RefineRequest>,
) -> Result<Json<RefineResponse>> {
    let db = state.db.clone();
    let proposed = payload.features.len();

    let features = tokio::task::spawn_blocking(move || {
        let write_txn = db.begin_write()?;
        let existing = features::load_project_features(&write_txn, &project_id)?;
        let merged = merge_features(existing, payload.features);
        let saved = save_all(&write_txn, &project_id, merged)?;
        write_txn.commit()?;
        Ok::<_, crate::AppError>(saved)
    })
    .await??;

    tracing::info!(
        "User {} refined project with {} proposals, {} features now",
        user_id,
        proposed,
        features.len()
    );
    Ok(Json(RefineResponse { features }))
}

async fn render(state: &AppState, project_id: String, project: ProjectInfo) -> Result<FileMap> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let project_features = features::list_features(&db, &project_id)?;
        generator::generate(&project, &project_features)
    })
    .await?
}

/// Render the generated project for display
pub async fn preview_project(
    State(state): State<AppState>,
    CallerId(_): CallerId,
    Path(project_id): Path<String>,
    Json(project): Json<ProjectInfo>,
) -> Result<Json<PreviewResponse>> {
    let files = render(&state, project_id, project.clone()).await?;
    Ok(Json(PreviewResponse {
        project,
        digest: generator::digest(&files),
        files: generator::file_list(&files),
    }))
}

/// Render the generated project as a zip archive
pub async fn download_project(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(project_id): Path<String>,
    Json(project): Json<ProjectInfo>,
) -> Result<Response> {
    let archive_name = format!("{}.zip", slugify(&project.name));
    let files = render(&state, project_id, project).await?;
    let digest = generator::digest(&files);
    let archive = tokio::task::spawn_blocking(move || generator::package_zip(&files)).await??;

    tracing::info!(
        "User {} downloaded {} ({} bytes)",
        user_id,
        archive_name,
        archive.len()
    );

    let mut response = archive.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{archive_name}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&digest) {
        headers.insert("x-content-digest", value);
    }
    Ok(response)
}

/// Fold edited source files back into the project's features
pub async fn sync_project_files(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(project_id): Path<String>,
    Json(payload): Json<SyncRequest>,
) -> Result<Json<SyncResponse>> {
    let db = state.db.clone();

    let updated = tokio::task::spawn_blocking(move || {
        let write_txn = db.begin_write()?;
        let existing = features::load_project_features(&write_txn, &project_id)?;
        let changed = sync_project(&existing, &payload.files);
        let saved = save_all(&write_txn, &project_id, changed)?;
        write_txn.commit()?;
        Ok::<_, crate::AppError>(saved)
    })
    .await??;

    tracing::info!("User {} synced {} features from files", user_id, updated.len());

    let updated: Vec<String> = updated.into_iter().map(|f| f.name).collect();
    Ok(Json(SyncResponse {
        success: true,
        message: format!("Synchronized {} features from files.", updated.len()),
        updated,
    }))
}

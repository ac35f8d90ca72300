pub mod features;
pub mod health;
pub mod identity;
pub mod projects;
pub mod simulate;

use axum::{
    Router,
    routing::{get, post, put},
};

pub use features::{create_feature, delete_feature, feature_endpoints, list_features, update_feature};
pub use health::health_check;
pub use identity::CallerId;
pub use projects::{download_project, preview_project, refine_project, sync_project_files};
pub use simulate::test_feature;

use crate::AppState;

/// All routes, without transport layers (CORS, tracing)
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/projects/:project_id/features",
            post(create_feature).get(list_features),
        )
        .route(
            "/api/features/:feature_id",
            put(update_feature).delete(delete_feature),
        )
        .route("/api/features/:feature_id/endpoints", get(feature_endpoints))
        .route("/api/features/test", post(test_feature))
        .route("/api/projects/:project_id/refine", post(refine_project))
        .route("/api/projects/:project_id/preview", post(preview_project))
        .route("/api/projects/:project_id/download", post(download_project))
        .route("/api/projects/:project_id/sync", post(sync_project_files))
        .with_state(state)
}

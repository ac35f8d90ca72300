use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::AppState;
use crate::db::features;
use crate::error::Result;
use crate::interpreter::HandlerRequest;
use crate::models::HandlerContext;
use crate::refine::resolve_endpoint;
use crate::routes::identity::CallerId;

fn default_method() -> String {
    "GET".to_string()
}

fn default_kind() -> String {
    "CRUD".to_string()
}

#[derive(Debug, Deserialize)]
pub struct TestFeatureRequest {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub schema: Option<Value>,
    #[serde(default = "default_kind")]
    pub feature_type: String,
    #[serde(default)]
    pub feature_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub project_id: Option<String>,
}

/// Project ids arrive as numbers or strings
fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Simulate one request against a feature
///
/// Without a `schema` the target feature is looked up by `feature_id`, or by
/// matching `endpoint` against the project's features. The handler's
/// envelope and status are returned as-is.
pub async fn test_feature(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(payload): Json<TestFeatureRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let db = state.db.clone();
    let interpreter = state.interpreter.clone();

    let response = tokio::task::spawn_blocking(move || {
        let mut schema = payload.schema.filter(|s| !s.is_null());
        let mut kind = payload.feature_type;

        if schema.is_none() {
            let target = match (payload.feature_id, payload.project_id.as_deref()) {
                (Some(id), _) => Some(features::get_feature(&db, id)?),
                (None, Some(project_id)) if !payload.endpoint.is_empty() => {
                    let project_features = features::list_features(&db, project_id)?;
                    resolve_endpoint(&project_features, &payload.endpoint).cloned()
                }
                _ => None,
            };
            if let Some(feature) = target {
                tracing::debug!("Resolved {} to feature '{}'", payload.endpoint, feature.name);
                schema = Some(feature.configuration.to_value()?);
                kind = feature.kind.to_string();
            }
        }

        let context = HandlerContext {
            user_id: Some(user_id),
            project_id: payload.project_id,
        };
        let request = HandlerRequest {
            method: &payload.method,
            endpoint: &payload.endpoint,
            body: &payload.body,
            schema: schema.as_ref(),
            context: &context,
        };
        interpreter.execute(&kind, &request)
    })
    .await??;

    Ok((response.status, Json(response.body)))
}

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

/// Header carrying the caller identity established by the session layer
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity of the wizard user making the request
///
/// Session management lives in front of this service; it forwards the
/// authenticated user id in `x-user-id`. Requests without it are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                tracing::warn!("Rejected request to {} without caller identity", parts.uri.path());
                AppError::Unauthorized(format!("Missing {USER_ID_HEADER} header"))
            })?;
        Ok(CallerId(user_id.to_string()))
    }
}

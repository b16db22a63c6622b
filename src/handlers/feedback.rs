//! Feedback endpoints, idempotent by build id.

use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::middleware::AuthUser;
use crate::utils::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize, Validate)]
pub struct BuildFeedbackRequest {
    #[validate(length(min = 1, max = 64))]
    pub build_id: String,
    #[validate(range(min = 1, max = 5))]
    pub rating: i64,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub comment: Option<String>,
}

/// POST /api/feedback
#[utoipa::path(
    post,
    path = "/api/feedback",
    request_body = BuildFeedbackRequest,
    responses((status = 200, description = "Feedback recorded")),
    security(("bearer_auth" = [])),
    tag = "Feedback"
)]
pub async fn build_feedback(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<BuildFeedbackRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    req.validate()
        .map_err(|e| ApiError::invalid_request(e.to_string()))?;

    state
        .mod_store
        .upsert_build_feedback(&req.build_id, &auth.user_id, req.rating, req.comment.as_deref())
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SortFeedbackRequest {
    #[validate(length(min = 1, max = 64))]
    pub build_id: String,
    pub accepted: bool,
    #[serde(default)]
    pub corrections: Option<serde_json::Value>,
}

/// POST /api/feedback/categorization
#[utoipa::path(
    post,
    path = "/api/feedback/categorization",
    request_body = SortFeedbackRequest,
    responses((status = 200, description = "Feedback recorded")),
    security(("bearer_auth" = [])),
    tag = "Feedback"
)]
pub async fn sort_feedback(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<SortFeedbackRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    req.validate()
        .map_err(|e| ApiError::invalid_request(e.to_string()))?;

    state
        .mod_store
        .upsert_sort_feedback(&req.build_id, &auth.user_id, req.accepted, req.corrections.as_ref())
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(serde_json::json!({ "success": true })))
}

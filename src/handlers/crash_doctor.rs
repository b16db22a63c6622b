//! Crash-doctor endpoint: one-shot JSON analysis of a crash log against the
//! current board.

use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::AppState;
use crate::middleware::AuthUser;
use crate::models::board::BoardState;
use crate::utils::error::{ApiError, ApiResult};

use super::build_board::validate_loader;

#[derive(Debug, Deserialize, Validate)]
pub struct CrashDoctorRequest {
    #[validate(length(min = 32, max = 2_000_000))]
    pub crash_log: String,
    pub board_state: BoardState,
    #[serde(default)]
    pub game_log: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub mc_version: String,
    pub mod_loader: String,
}

/// POST /api/ai/crash-doctor/analyze
#[utoipa::path(
    post,
    path = "/api/ai/crash-doctor/analyze",
    request_body = CrashDoctorRequest,
    responses(
        (status = 200, description = "Analysis with suggestions and a patched board state"),
        (status = 403, description = "Tier does not allow crash analysis"),
        (status = 429, description = "Quota exhausted"),
    ),
    security(("bearer_auth" = [])),
    tag = "Crash Doctor"
)]
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CrashDoctorRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    req.validate()
        .map_err(|e| ApiError::invalid_request(e.to_string()))?;
    validate_loader(&req.mod_loader)?;

    // Quota before any paid call; crash analysis has no pack size.
    let user = state.quota.check(&auth.user_id, 0).await?;

    let cancel = CancellationToken::new();
    let budget = Duration::from_secs(state.crash_budget_secs);

    let result = tokio::time::timeout(
        budget,
        state.crash_pipeline.run(
            &user,
            &req.crash_log,
            req.game_log.as_deref(),
            &req.board_state,
            &req.mc_version,
            &req.mod_loader,
            &cancel,
        ),
    )
    .await;

    match result {
        Ok(Ok(payload)) => Ok(Json(payload)),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            cancel.cancel();
            Err(ApiError::llm_timeout(format!(
                "crash analysis exceeded its {}s budget",
                budget.as_secs()
            )))
        },
    }
}

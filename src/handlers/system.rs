//! Liveness endpoint.

use axum::{Json, extract::State};
use std::sync::Arc;

use crate::AppState;
use crate::utils::error::ApiResult;

/// GET /api/health
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service health")),
    tag = "System"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let store_ok = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.mod_store.pool())
        .await
        .is_ok();

    Ok(Json(serde_json::json!({
        "status": if store_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "store": store_ok,
    })))
}

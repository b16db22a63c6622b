//! Auto-sort endpoint: categorize an arbitrary mod list into the standard
//! buckets without touching the board.

use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::AppState;
use crate::middleware::AuthUser;
use crate::services::llm::scenarios::categorize::SortableMod;
use crate::services::tracer::PipelineTracer;
use crate::utils::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize, Serialize)]
pub struct AutoSortMod {
    pub name: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AutoSortRequest {
    #[validate(length(min = 1, max = 500))]
    pub mods: Vec<AutoSortMod>,
    #[serde(default)]
    pub max_categories: Option<usize>,
    /// Accepted for wire compatibility; the sort call runs deterministic.
    #[serde(default)]
    pub creativity: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct AutoSortResponse {
    pub success: bool,
    pub categories: Vec<String>,
    pub mod_to_category: HashMap<String, String>,
    pub stats: serde_json::Value,
}

/// POST /api/ai/auto-sort
#[utoipa::path(
    post,
    path = "/api/ai/auto-sort",
    request_body = AutoSortRequest,
    responses(
        (status = 200, description = "Category assignment for every input mod", body = AutoSortResponse),
        (status = 429, description = "Quota exhausted"),
    ),
    security(("bearer_auth" = [])),
    tag = "Assembly"
)]
pub async fn auto_sort(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<AutoSortRequest>,
) -> ApiResult<Json<AutoSortResponse>> {
    req.validate()
        .map_err(|e| ApiError::invalid_request(e.to_string()))?;

    let user = state.quota.check(&auth.user_id, 0).await?;

    let sortable: Vec<SortableMod> = req
        .mods
        .iter()
        .map(|m| SortableMod {
            source_id: m.source_id.clone().unwrap_or_else(|| m.name.clone()),
            name: m.name.clone(),
            description: m.description.clone().unwrap_or_default(),
            capabilities: Vec::new(),
        })
        .collect();

    let tracer = PipelineTracer::new();
    let cancel = CancellationToken::new();
    let groups = state
        .categorizer
        .sort_loose(sortable, req.max_categories, &tracer, &cancel)
        .await
        .map_err(ApiError::from)?;

    let mut mod_to_category = HashMap::new();
    for group in &groups {
        for id in &group.mod_ids {
            mod_to_category.insert(id.clone(), group.name.clone());
        }
    }

    state.quota.commit(&user.id, tracer.total_tokens()).await?;

    Ok(Json(AutoSortResponse {
        success: true,
        categories: groups.into_iter().map(|g| g.name).collect(),
        mod_to_category,
        stats: serde_json::json!({
            "tokens": tracer.total_tokens(),
            "cost_usd": tracer.total_cost_usd(),
        }),
    }))
}

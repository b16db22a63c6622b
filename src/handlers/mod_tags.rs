//! Public mod-tag lookup. No auth, no LLM: a plain catalog read.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::utils::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize, Validate)]
pub struct ModTagsRequest {
    #[validate(length(min = 1, max = 200))]
    pub mods: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ModTagInfo {
    pub source_id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub capabilities: Vec<String>,
    pub modrinth_categories: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ModTagsResponse {
    pub success: bool,
    pub tags: HashMap<String, ModTagInfo>,
}

/// POST /api/get-mod-tags
#[utoipa::path(
    post,
    path = "/api/get-mod-tags",
    request_body = ModTagsRequest,
    responses((status = 200, description = "Tags for each known mod", body = ModTagsResponse)),
    tag = "Catalog"
)]
pub async fn get_mod_tags(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModTagsRequest>,
) -> ApiResult<Json<ModTagsResponse>> {
    req.validate()
        .map_err(|e| ApiError::invalid_request(e.to_string()))?;

    let mut tags = HashMap::new();
    for ident in &req.mods {
        let found = state
            .mod_store
            .find_by_slug_or_name(ident)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;

        if let Some(entry) = found {
            tags.insert(
                ident.clone(),
                ModTagInfo {
                    source_id: entry.source_id,
                    name: entry.name,
                    tags: entry.tags,
                    capabilities: {
                        let mut caps: Vec<String> = entry.capabilities.into_iter().collect();
                        caps.sort();
                        caps
                    },
                    modrinth_categories: {
                        let mut cats: Vec<String> =
                            entry.modrinth_categories.into_iter().collect();
                        cats.sort();
                        cats
                    },
                },
            );
        }
    }

    Ok(Json(ModTagsResponse { success: true, tags }))
}

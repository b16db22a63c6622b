//! Board assembly endpoint: streams stage progress over SSE and finishes
//! with exactly one terminal event.

use axum::{
    Extension, Json,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::AppState;
use crate::middleware::AuthUser;
use crate::services::assembly::AssemblyRequest;
use crate::services::progress::progress_channel;
use crate::utils::error::{ApiError, ApiResult};

/// Proxy keep-alive heartbeat interval.
const KEEP_ALIVE_SECS: u64 = 25;

pub const KNOWN_LOADERS: [&str; 4] = ["fabric", "forge", "neoforge", "quilt"];

#[derive(Debug, Deserialize, Validate)]
pub struct BuildBoardRequest {
    #[validate(length(min = 1, max = 4000))]
    pub prompt: String,
    #[validate(length(min = 1, max = 32))]
    pub mc_version: String,
    pub mod_loader: String,
    #[validate(range(min = 1, max = 500))]
    pub max_mods: i64,
    #[serde(default)]
    pub current_mods: Vec<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub fabric_compat_mode: Option<bool>,
    #[serde(default)]
    pub use_v3_architecture: Option<bool>,
}

pub fn validate_loader(loader: &str) -> ApiResult<()> {
    if KNOWN_LOADERS.contains(&loader) {
        Ok(())
    } else {
        Err(ApiError::invalid_request(format!(
            "unknown mod loader '{}', expected one of {:?}",
            loader, KNOWN_LOADERS
        )))
    }
}

/// POST /api/ai/build-board
///
/// Auth and quota are settled before anything paid happens; the pipeline
/// then runs in its own task while this handler returns the event stream.
/// Dropping the stream (client disconnect) trips the cancellation token.
#[utoipa::path(
    post,
    path = "/api/ai/build-board",
    request_body = BuildBoardRequest,
    responses(
        (status = 200, description = "SSE stream of stage/partial events ending in complete or error"),
        (status = 403, description = "Tier does not allow assembly"),
        (status = 429, description = "Quota exhausted"),
    ),
    security(("bearer_auth" = [])),
    tag = "Assembly"
)]
pub async fn build_board(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<BuildBoardRequest>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, axum::Error>>>> {
    req.validate()
        .map_err(|e| ApiError::invalid_request(e.to_string()))?;
    validate_loader(&req.mod_loader)?;

    let user = state.quota.check(&auth.user_id, req.max_mods).await?;

    let request = AssemblyRequest {
        prompt: req.prompt,
        mc_version: req.mc_version,
        mod_loader: req.mod_loader,
        max_mods: req.max_mods,
        current_mods: req.current_mods,
        project_id: req.project_id,
        fabric_compat_mode: req.fabric_compat_mode.unwrap_or(false),
        use_v3_architecture: req.use_v3_architecture.unwrap_or(state.use_v3_default),
    };

    let (progress, rx) = progress_channel();
    let cancel = CancellationToken::new();

    let pipeline = Arc::clone(&state.assembly_pipeline);
    let pipeline_cancel = cancel.clone();
    tokio::spawn(async move {
        pipeline.run(user, request, progress, pipeline_cancel).await;
    });

    // The guard lives inside the stream closure: the client closing the
    // stream cancels every in-flight sub-task of the pipeline.
    let guard = cancel.drop_guard();
    let stream = ReceiverStream::new(rx).map(move |event| {
        let _keep = &guard;
        Event::default().json_data(&event)
    });

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS))))
}

//! Crash-analysis pipeline.
//!
//! Stage order: dedup cache → sanitizer → freshness check → LLM diagnosis →
//! fix planning with registry validation → board patching → session record.
//! A dedup hit short-circuits everything and replays the cached response so
//! identical logs inside the window yield byte-identical suggestions.

pub mod dedup;
pub mod fix_planner;
pub mod log_check;
pub mod patcher;
pub mod sanitizer;

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::board::BoardState;
use crate::models::crash::CrashSession;
use crate::models::user::User;
use crate::services::llm::LlmGateway;
use crate::services::llm::scenarios::crash_analysis::CrashAnalysisScenario;
use crate::services::mod_store::ModStore;
use crate::services::quota::QuotaGate;
use crate::services::registry::ModRegistry;
use crate::services::tracer::PipelineTracer;
use crate::utils::error::ApiError;

use dedup::DedupCache;

pub struct CrashPipeline {
    store: Arc<ModStore>,
    gateway: Arc<LlmGateway>,
    registry: Arc<dyn ModRegistry>,
    dedup: Arc<DedupCache>,
    quota: Arc<QuotaGate>,
}

impl CrashPipeline {
    pub fn new(
        store: Arc<ModStore>,
        gateway: Arc<LlmGateway>,
        registry: Arc<dyn ModRegistry>,
        dedup: Arc<DedupCache>,
        quota: Arc<QuotaGate>,
    ) -> Self {
        Self { store, gateway, registry, dedup, quota }
    }

    /// Run the full analysis for one request. Quota admission happened
    /// before this; the counters move here, on success only.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        user: &User,
        crash_log: &str,
        game_log: Option<&str>,
        board: &BoardState,
        mc_version: &str,
        mod_loader: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ApiError> {
        let tracer = PipelineTracer::new();

        // 1. Dedup: same normalized log from the same user inside the TTL
        //    replays the recorded response verbatim.
        tracer.begin_stage("dedup");
        let log_md5 = DedupCache::fingerprint(crash_log);
        if let Some(cached) = self.dedup.get(&user.id, &log_md5) {
            tracer.end_stage("dedup", true);
            tracing::info!("crash dedup hit for user {} ({})", user.id, log_md5);
            let payload: serde_json::Value = serde_json::from_str(&cached)?;
            self.quota.commit(&user.id, 0).await?;
            return Ok(payload);
        }
        tracer.end_stage("dedup", true);

        // 2. Sanitize. The launcher game log, when present, rides along for
        //    extraction but the fingerprint stays on the crash log alone.
        tracer.begin_stage("sanitize");
        let combined = match game_log {
            Some(game_log) => format!("{}\n{}", crash_log, game_log),
            None => crash_log.to_string(),
        };
        let report = sanitizer::sanitize(&combined);
        tracer.end_stage("sanitize", true);

        // 3. Freshness: a log that barely overlaps the board still gets
        //    analyzed, but the response is flagged.
        tracer.begin_stage("validate_log");
        let mut warnings: Vec<String> = Vec::new();
        if log_check::is_stale(&report.mods_in_log, board) {
            warnings.push(log_check::STALE_LOG_WARNING.to_string());
        }
        tracer.end_stage("validate_log", true);

        // 4. Diagnose.
        tracer.begin_stage("analyze");
        let scenario = CrashAnalysisScenario {
            mc_version: report.mc_version.clone().unwrap_or_else(|| mc_version.to_string()),
            mod_loader: report.mod_loader.clone().unwrap_or_else(|| mod_loader.to_string()),
            crash_excerpt: report.text.clone(),
            stack_trace: report.stack_trace.clone(),
            mods_in_log: report.mods_in_log.clone(),
            board_mods: board.mods.iter().map(|m| m.slug.clone()).collect(),
            detected_error_kind: report.error_kind_hint.map(|k| k.as_str().to_string()),
        };
        let analysis = match self.gateway.call(&scenario, &tracer, cancel).await {
            Ok(analysis) => analysis,
            Err(e) => {
                tracer.end_stage("analyze", false);
                return Err(ApiError::from(e));
            },
        };
        tracer.end_stage("analyze", true);

        // 5. Plan fixes with registry validation; failures become warnings.
        tracer.begin_stage("plan_fixes");
        let planned = fix_planner::plan_fixes(
            analysis.suggested_fixes,
            board,
            Arc::clone(&self.registry),
            mod_loader,
            mc_version,
        )
        .await;
        warnings.extend(planned.warnings);
        tracer.end_stage("plan_fixes", true);

        // 6. Patch a deep copy of the board.
        tracer.begin_stage("patch_board");
        let patched = patcher::apply_operations(board, &planned.operations);
        tracer.end_stage("patch_board", true);

        // 7. Record the session.
        tracer.begin_stage("record");
        let session = CrashSession {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            crash_log_sanitized: report.text,
            board_state_snapshot: board.clone(),
            root_cause: analysis.root_cause.clone(),
            error_kind: analysis.error_kind,
            confidence: analysis.confidence.clamp(0.0, 1.0),
            suggestions: planned.operations.clone(),
            warnings: warnings.clone(),
            patched_board_state: patched.clone(),
            token_usage: tracer.total_tokens(),
            created_at: Utc::now(),
        };
        self.store
            .insert_crash_session(&session)
            .await
            .map_err(|e| ApiError::internal(format!("failed to record crash session: {}", e)))?;
        tracer.end_stage("record", true);

        let payload = serde_json::json!({
            "success": true,
            "session_id": session.id,
            "root_cause": session.root_cause,
            "error_kind": session.error_kind,
            "confidence": session.confidence,
            "suggestions": session.suggestions,
            "warnings": session.warnings,
            "patched_board_state": session.patched_board_state,
            "_pipeline": tracer.report(),
        });

        self.dedup
            .insert(&user.id, &log_md5, serde_json::to_string(&payload)?);
        self.quota.commit(&user.id, tracer.total_tokens()).await?;

        Ok(payload)
    }
}

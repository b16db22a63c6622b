//! Assembly pipeline: from a natural-language request to a finished board.
//!
//! Conditional flow: every request goes through query planning, hybrid
//! retrieval, selection, dependency resolution and the loader-bridge policy;
//! themed requests additionally get architecture planning before retrieval
//! and a refinement pass afterwards, while simple requests use the standard
//! categorizer. All progress is streamed; the terminal event carries the
//! board plus the pipeline trace, and quota counters move only when that
//! terminal event is `complete`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::mods::ModEntry;
use crate::models::plan::{RequestType, SearchPlan};
use crate::models::user::User;
use crate::services::architect::{ArchitecturePlanner, MinedReferences};
use crate::services::board_assembler::{self, BoardGroup};
use crate::services::categorizer::Categorizer;
use crate::services::embedder::Embedder;
use crate::services::llm::LlmGateway;
use crate::services::llm::scenarios::query_plan::{QueryPlanScenario, normalize_search_plan};
use crate::services::loader_bridge;
use crate::services::mod_store::ModStore;
use crate::services::progress::ProgressSender;
use crate::services::quota::QuotaGate;
use crate::services::resolver::{DependencyResolver, Resolution};
use crate::services::retrieval::HybridRetrieval;
use crate::services::selector::FinalSelector;
use crate::services::tracer::PipelineTracer;
use crate::utils::error::ApiError;

/// Pool size handed to the selector in the simple flow.
const SIMPLE_POOL_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    pub prompt: String,
    pub mc_version: String,
    pub mod_loader: String,
    pub max_mods: i64,
    pub current_mods: Vec<String>,
    pub project_id: Option<String>,
    pub fabric_compat_mode: bool,
    pub use_v3_architecture: bool,
}

pub struct AssemblyPipeline {
    store: Arc<ModStore>,
    embedder: Arc<dyn Embedder>,
    gateway: Arc<LlmGateway>,
    retrieval: Arc<HybridRetrieval>,
    resolver: Arc<DependencyResolver>,
    architect: Arc<ArchitecturePlanner>,
    selector: Arc<FinalSelector>,
    categorizer: Arc<Categorizer>,
    quota: Arc<QuotaGate>,
    min_downloads: i64,
    budget: Duration,
}

impl AssemblyPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ModStore>,
        embedder: Arc<dyn Embedder>,
        gateway: Arc<LlmGateway>,
        retrieval: Arc<HybridRetrieval>,
        resolver: Arc<DependencyResolver>,
        architect: Arc<ArchitecturePlanner>,
        selector: Arc<FinalSelector>,
        categorizer: Arc<Categorizer>,
        quota: Arc<QuotaGate>,
        min_downloads: i64,
        budget: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            gateway,
            retrieval,
            resolver,
            architect,
            selector,
            categorizer,
            quota,
            min_downloads,
            budget,
        }
    }

    /// Drive one request to its terminal event. Never panics the caller:
    /// every outcome ends in exactly one `complete` or `error`.
    pub async fn run(
        &self,
        user: User,
        request: AssemblyRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) {
        let tracer = PipelineTracer::new();
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApiError::internal("request cancelled")),
            result = tokio::time::timeout(
                self.budget,
                self.execute(&user, &request, &tracer, &progress, &cancel, started),
            ) => match result {
                Ok(inner) => inner,
                Err(_) => Err(ApiError::llm_timeout(format!(
                    "assembly exceeded its {}s budget",
                    self.budget.as_secs()
                ))),
            },
        };

        match outcome {
            Ok(payload) => {
                // Counters move only on a successful terminal complete.
                if let Err(e) = self.quota.commit(&user.id, tracer.total_tokens()).await {
                    tracing::error!("failed to commit quota for {}: {}", user.id, e);
                }
                progress.complete(payload).await;
            },
            Err(e) => {
                if cancel.is_cancelled() {
                    tracing::info!("assembly for {} cancelled by client", user.id);
                }
                progress.error(e.code, &e.message).await;
            },
        }
    }

    async fn execute(
        &self,
        user: &User,
        request: &AssemblyRequest,
        tracer: &PipelineTracer,
        progress: &ProgressSender,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<serde_json::Value, ApiError> {
        let loader = request.mod_loader.as_str();
        let mc_version = request.mc_version.as_str();
        let mut warnings: Vec<String> = Vec::new();

        // ---- Query planning -------------------------------------------------
        progress.stage("plan", 5, None).await;
        tracer.begin_stage("plan");
        let scenario = QueryPlanScenario {
            prompt: request.prompt.clone(),
            mc_version: mc_version.to_string(),
            mod_loader: loader.to_string(),
            max_mods: request.max_mods,
            current_mods: request.current_mods.clone(),
        };
        let plan = match self.gateway.call(&scenario, tracer, cancel).await {
            Ok(raw) => normalize_search_plan(raw, &request.prompt),
            Err(e) => {
                tracer.end_stage("plan", false);
                return Err(e.into());
            },
        };
        tracer.end_stage("plan", true);
        tracing::info!(
            "planned {} request with {} queries",
            plan.request_type.as_str(),
            plan.search_queries.len()
        );

        let themed = plan.use_architecture_planner && request.use_v3_architecture;

        // ---- Architecture planning (themed only) ----------------------------
        let mut references: Option<MinedReferences> = None;
        let mut architecture = None;
        if themed {
            progress.stage("architecture", 15, Some("mining reference packs")).await;
            tracer.begin_stage("mine_references");
            let mined = match self.embedder.embed(&request.prompt).await {
                Ok(embedding) => self
                    .architect
                    .mine_references(&embedding, loader, mc_version)
                    .await
                    .map_err(|e| ApiError::internal(e.to_string()))?,
                Err(e) => {
                    tracing::warn!("prompt embedding failed, planning without references: {}", e);
                    MinedReferences {
                        packs: Vec::new(),
                        baseline: HashMap::new(),
                        cooccurrence: Vec::new(),
                    }
                },
            };
            tracer.end_stage("mine_references", true);

            tracer.begin_stage("architecture");
            let planned = self
                .architect
                .plan(
                    &request.prompt,
                    mc_version,
                    loader,
                    request.max_mods,
                    &mined,
                    tracer,
                    cancel,
                )
                .await;
            match planned {
                Ok(arch) => {
                    tracer.end_stage("architecture", true);
                    architecture = Some(arch);
                    references = Some(mined);
                },
                Err(e) => {
                    tracer.end_stage("architecture", false);
                    return Err(e.into());
                },
            }
        }

        // ---- Hybrid retrieval -----------------------------------------------
        progress.stage("retrieve", 35, None).await;
        tracer.begin_stage("retrieve");
        let mut baseline: HashMap<String, f64> = references
            .as_ref()
            .map(|r| r.baseline.clone())
            .unwrap_or_default();
        for id in &plan.baseline_mods {
            baseline.insert(id.clone(), 1.0);
        }
        let candidates = self
            .retrieval
            .retrieve(&plan, loader, mc_version, self.min_downloads, &baseline)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        tracer.end_stage("retrieve", true);
        progress
            .partial(serde_json::json!({ "candidates": candidates.len() }))
            .await;

        // No candidates is not fatal: an empty board with a warning.
        if candidates.is_empty() {
            warnings.push("no candidates matched the request".to_string());
            let board = board_assembler::assemble(request.project_id.clone(), &[]);
            return Ok(self
                .final_payload(user, request, &plan, board, &Resolution::default(), 0, warnings, tracer, started)
                .await?);
        }

        // ---- Final selection ------------------------------------------------
        progress.stage("select", 55, None).await;
        tracer.begin_stage("select");
        let pool: Vec<ModEntry> = match &architecture {
            Some(arch) => FinalSelector::prefilter_pool(&candidates, arch),
            None => candidates
                .iter()
                .take(SIMPLE_POOL_SIZE)
                .map(|c| c.entry.clone())
                .collect(),
        };
        let selection_result = self
            .selector
            .select(
                &request.prompt,
                mc_version,
                loader,
                request.max_mods,
                architecture.as_ref(),
                &pool,
                tracer,
                cancel,
            )
            .await;
        let selections = match selection_result {
            Ok(s) => s,
            Err(e) => {
                tracer.end_stage("select", false);
                return Err(e.into());
            },
        };
        tracer.end_stage("select", true);

        if selections.is_empty() {
            return Err(ApiError::new(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "no_viable_selection",
                "no viable selection after filtering",
            ));
        }

        let pool_by_id: HashMap<&str, &ModEntry> =
            pool.iter().map(|m| (m.source_id.as_str(), m)).collect();
        let mut selected_entries: Vec<ModEntry> = selections
            .iter()
            .filter_map(|s| pool_by_id.get(s.source_id.as_str()).map(|m| (*m).clone()))
            .collect();

        // ---- Dependency resolution ------------------------------------------
        progress.stage("resolve", 70, None).await;
        tracer.begin_stage("resolve");
        let mut resolution = self
            .resolver
            .resolve(&selected_entries, loader, mc_version)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        tracer.end_stage("resolve", true);

        // ---- Loader-bridge policy -------------------------------------------
        tracer.begin_stage("bridge");
        let bridge_added = self
            .apply_bridge_policy(
                &mut selected_entries,
                &mut resolution,
                request,
                &mut warnings,
            )
            .await?;
        tracer.end_stage("bridge", true);

        // ---- Categorization -------------------------------------------------
        progress.stage("categorize", 85, None).await;
        let mut all_mods: Vec<ModEntry> = selected_entries.clone();
        all_mods.extend(resolution.added_dependencies.iter().cloned());
        all_mods.extend(bridge_added.iter().cloned());
        dedup_by_source_id(&mut all_mods);

        let groups = match &architecture {
            Some(arch) => {
                tracer.begin_stage("refine");
                let planned_category_of: HashMap<String, usize> = selections
                    .iter()
                    .filter_map(|s| s.category_index.map(|i| (s.source_id.clone(), i)))
                    .collect();
                let refined = self
                    .architect
                    .refine(arch, &all_mods, &planned_category_of, tracer, cancel)
                    .await;
                match refined {
                    Ok(groups) => {
                        tracer.end_stage("refine", true);
                        groups
                    },
                    Err(e) => {
                        tracer.end_stage("refine", false);
                        return Err(e.into());
                    },
                }
            },
            None => {
                tracer.begin_stage("categorize");
                match self.categorizer.categorize(&all_mods, tracer, cancel).await {
                    Ok(groups) => {
                        tracer.end_stage("categorize", true);
                        groups
                    },
                    Err(e) => {
                        tracer.end_stage("categorize", false);
                        return Err(e.into());
                    },
                }
            },
        };

        // ---- Board assembly -------------------------------------------------
        progress.stage("assemble", 95, None).await;
        tracer.begin_stage("assemble");
        let by_id: HashMap<&str, &ModEntry> =
            all_mods.iter().map(|m| (m.source_id.as_str(), m)).collect();
        let board_groups: Vec<BoardGroup> = groups
            .iter()
            .map(|g| BoardGroup {
                title: g.name.clone(),
                mods: g
                    .mod_ids
                    .iter()
                    .filter_map(|id| by_id.get(id.as_str()).map(|m| (*m).clone()))
                    .collect(),
            })
            .filter(|g| !g.mods.is_empty())
            .collect();
        let board = board_assembler::assemble(request.project_id.clone(), &board_groups);
        tracer.end_stage("assemble", true);

        self.final_payload(
            user,
            request,
            &plan,
            board,
            &resolution,
            selections.len(),
            warnings,
            tracer,
            started,
        )
        .await
    }

    /// Apply the bridge policy and fold the resulting bridge mods (and their
    /// dependencies) into the resolution.
    async fn apply_bridge_policy(
        &self,
        selected: &mut Vec<ModEntry>,
        resolution: &mut Resolution,
        request: &AssemblyRequest,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<ModEntry>, ApiError> {
        let mut scope: Vec<ModEntry> = selected.clone();
        scope.extend(resolution.added_dependencies.iter().cloned());

        let plan = loader_bridge::evaluate(
            &scope,
            &request.mod_loader,
            &request.mc_version,
            request.fabric_compat_mode,
        );
        warnings.extend(plan.notes.iter().cloned());

        if !plan.removed.is_empty() {
            let removed: std::collections::HashSet<&str> =
                plan.removed.iter().map(String::as_str).collect();
            selected.retain(|m| !removed.contains(m.source_id.as_str()));
            resolution
                .added_dependencies
                .retain(|m| !removed.contains(m.source_id.as_str()));
        }

        let mut bridges: Vec<ModEntry> = Vec::new();
        for slug in &plan.bridge_slugs {
            match self.store.find_by_slug_or_name(slug).await {
                Ok(Some(entry)) => bridges.push(entry),
                Ok(None) => {
                    warnings.push(format!("bridge mod {} is not in the catalog", slug))
                },
                Err(e) => return Err(ApiError::internal(e.to_string())),
            }
        }

        if !bridges.is_empty() {
            // Bridge mods resolve like any other selection.
            let mut widened = selected.clone();
            widened.extend(bridges.iter().cloned());
            let bridge_resolution = self
                .resolver
                .resolve(&widened, &request.mod_loader, &request.mc_version)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
            *resolution = bridge_resolution;
        }

        Ok(bridges)
    }

    #[allow(clippy::too_many_arguments)]
    async fn final_payload(
        &self,
        user: &User,
        request: &AssemblyRequest,
        plan: &SearchPlan,
        board: crate::models::board::BoardState,
        resolution: &Resolution,
        selected_count: usize,
        warnings: Vec<String>,
        tracer: &PipelineTracer,
        started: Instant,
    ) -> Result<serde_json::Value, ApiError> {
        let build_id = Uuid::new_v4().to_string();
        let duration_ms = started.elapsed().as_millis() as i64;

        let unresolved_warnings: Vec<String> = resolution
            .unresolved
            .iter()
            .map(|u| format!("dependency {}: {}", u.source_id, u.missing_reason))
            .collect();
        let mut warnings = warnings;
        warnings.extend(unresolved_warnings);

        let summary = format!(
            "{} mods in {} categories for {} {}",
            board.mods.len(),
            board.categories.len(),
            request.mod_loader,
            request.mc_version
        );
        let explanation = match plan.request_type {
            RequestType::SimpleAdd => "Added the requested mods with their dependencies.",
            RequestType::Performance => {
                "Assembled an optimization-focused set for the target loader."
            },
            RequestType::ThemedPack => {
                "Planned a themed pack from reference architectures, then selected and organized mods."
            },
        };

        if let Err(e) = self
            .store
            .insert_build(
                &build_id,
                &user.id,
                &request.prompt,
                &request.mc_version,
                &request.mod_loader,
                plan.request_type.as_str(),
                board.mods.len() as i64,
                resolution.added_dependencies.len() as i64,
                tracer.total_tokens(),
                tracer.total_cost_usd(),
                duration_ms,
            )
            .await
        {
            tracing::error!("failed to record build {}: {}", build_id, e);
        }

        Ok(serde_json::json!({
            "success": true,
            "build_id": build_id,
            "board_state": board,
            "summary": summary,
            "explanation": explanation,
            "warnings": warnings,
            "conflicts": resolution.conflicts,
            "stats": {
                "request_type": plan.request_type.as_str(),
                "selected": selected_count,
                "dependencies_added": resolution.added_dependencies.len(),
                "conflicts": resolution.conflicts.len(),
                "unresolved": resolution.unresolved.len(),
                "tokens": tracer.total_tokens(),
                "cost_usd": tracer.total_cost_usd(),
                "duration_ms": duration_ms,
            },
            "_pipeline": tracer.report(),
        }))
    }
}

fn dedup_by_source_id(mods: &mut Vec<ModEntry>) {
    let mut seen = std::collections::HashSet::new();
    mods.retain(|m| seen.insert(m.source_id.clone()));
}

//! Query-planning scenario: classify the user's request and emit the
//! retrieval plan.

use serde::Serialize;

use crate::models::plan::{QueryKind, RequestType, SearchPlan, SearchQuery};
use crate::models::mods::is_valid_capability;
use crate::services::llm::gateway::LlmScenario;

const PROMPT_BASE: &str = r#"You are the request planner of a Minecraft modpack assembly service.
Given a user's natural-language request, the target game version and mod loader,
and the mods already on their board, produce a retrieval plan as a JSON object.

Classification rules:
- "simple_add": the prompt names specific mods, or asks for 15 or fewer mods.
- "performance": the prompt is about optimization, FPS, memory or stutter and
  carries no topical theme.
- "themed_pack": everything else; always when 20+ mods are requested and the
  prompt carries topical content (e.g. "medieval", "tech", "horror").

Plan rules:
- Emit between 3 and 6 search queries. Mix both kinds: "semantic" queries are
  natural-language descriptions for embedding search, "keyword" queries are
  short term lists for full-text search.
- Weights are in (0, 1]; give the queries closest to the user's literal intent
  the highest weight.
- "capabilities_focus" lists capability paths (lowercase dotted, e.g.
  "combat.weapons.melee") that the request clearly demands.
- "baseline_mods" lists source ids of mods the user explicitly named, taken
  from the current mod list when they are already present.
- "use_architecture_planner" is true exactly when request_type is
  "themed_pack".

Respond with ONLY a JSON object of this shape:
{
  "request_type": "simple_add" | "performance" | "themed_pack",
  "use_architecture_planner": bool,
  "search_queries": [{"kind": "keyword" | "semantic", "text": str, "weight": float}],
  "capabilities_focus": [str],
  "baseline_mods": [str]
}"#;

/// Serialized as the user prompt.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlanScenario {
    pub prompt: String,
    pub mc_version: String,
    pub mod_loader: String,
    pub max_mods: i64,
    pub current_mods: Vec<String>,
}

impl LlmScenario for QueryPlanScenario {
    type Response = SearchPlan;

    fn name(&self) -> &'static str {
        "query_plan"
    }

    fn system_prompt(&self) -> String {
        PROMPT_BASE.to_string()
    }

    fn temperature(&self) -> f64 {
        0.1
    }

    fn max_tokens(&self) -> u32 {
        1024
    }
}

/// Enforce the plan contract on model output: 3-6 queries, valid capability
/// paths, clamped weights, and the architecture-planner flag derived from the
/// request type rather than trusted.
pub fn normalize_search_plan(mut plan: SearchPlan, prompt: &str) -> SearchPlan {
    plan.use_architecture_planner = plan.request_type == RequestType::ThemedPack;

    plan.capabilities_focus.retain(|c| is_valid_capability(c));

    for q in &mut plan.search_queries {
        if !q.weight.is_finite() || q.weight <= 0.0 {
            q.weight = 0.5;
        }
        q.weight = q.weight.min(1.0);
    }
    plan.search_queries.retain(|q| !q.text.trim().is_empty());

    if plan.search_queries.len() > 6 {
        plan.search_queries
            .sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        plan.search_queries.truncate(6);
    }

    // Too few queries: fall back to searching the raw prompt both ways.
    if plan.search_queries.len() < 3 {
        let existing_semantic = plan
            .search_queries
            .iter()
            .any(|q| q.kind == QueryKind::Semantic);
        plan.search_queries.push(SearchQuery {
            kind: QueryKind::Keyword,
            text: prompt.to_string(),
            weight: 0.6,
        });
        if !existing_semantic {
            plan.search_queries.push(SearchQuery {
                kind: QueryKind::Semantic,
                text: prompt.to_string(),
                weight: 0.8,
            });
        }
        while plan.search_queries.len() < 3 {
            plan.search_queries.push(SearchQuery {
                kind: QueryKind::Semantic,
                text: prompt.to_string(),
                weight: 0.5,
            });
        }
    }

    plan
}

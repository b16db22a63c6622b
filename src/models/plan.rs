//! Planning models produced by the LLM stages: the search plan, the planned
//! architecture and the final selection entries.
//!
//! These are validated at the gateway boundary; nothing downstream sees raw
//! model output.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    SimpleAdd,
    Performance,
    ThemedPack,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimpleAdd => "simple_add",
            Self::Performance => "performance",
            Self::ThemedPack => "themed_pack",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Keyword,
    Semantic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub kind: QueryKind,
    pub text: String,
    pub weight: f64,
}

/// Output of the query-planner call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPlan {
    pub request_type: RequestType,
    pub use_architecture_planner: bool,
    pub search_queries: Vec<SearchQuery>,
    #[serde(default)]
    pub capabilities_focus: Vec<String>,
    #[serde(default)]
    pub baseline_mods: Vec<String>,
}

/// One category of a planned pack architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub preferred_capabilities: Vec<String>,
    pub target_mods: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedArchitecture {
    pub categories: Vec<PlannedCategory>,
    #[serde(default)]
    pub pack_archetype: String,
    #[serde(default)]
    pub estimated_total_mods: i64,
}

impl PlannedArchitecture {
    pub fn total_target_mods(&self) -> i64 {
        self.categories.iter().map(|c| c.target_mods).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRole {
    Primary,
    Library,
    Dependency,
    Bridge,
}

/// One entry of the final selector's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedMod {
    pub source_id: String,
    #[serde(default)]
    pub category_index: Option<usize>,
    pub reason: String,
    pub role: SelectionRole,
}

//! Final-selection scenario: pick the pack's mods from the candidate pool.

use serde::{Deserialize, Serialize};

use crate::models::plan::SelectedMod;
use crate::services::llm::gateway::LlmScenario;

const PROMPT_BASE: &str = r#"You are choosing the final mod list for a Minecraft modpack.
You receive the user's request, optional planned categories with per-category
budgets, and a candidate pool. Every candidate carries its capabilities and
popularity.

Rules:
- Select exactly the requested number of mods; never select a mod that is
  not in the pool; never select the same mod twice.
- When categories are provided, "category_index" is the zero-based index of
  the category the mod fills; honor each category's target count and required
  capabilities. Every category whose required capability is represented in
  the pool must receive at least one mod.
- Without categories, set "category_index" to null.
- "role" is "primary" for player-facing picks and "library" for
  dependency/API mods.
- "reason" is one short sentence tied to the user's request.

Respond with ONLY a JSON object:
{
  "selections": [{
    "source_id": str,
    "category_index": int | null,
    "reason": str,
    "role": "primary" | "library" | "dependency" | "bridge"
  }]
}"#;

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBudget {
    pub index: usize,
    pub name: String,
    pub required_capabilities: Vec<String>,
    pub target_mods: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateSummary {
    pub source_id: String,
    pub name: String,
    pub summary: String,
    pub capabilities: Vec<String>,
    pub downloads: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionScenario {
    pub prompt: String,
    pub mc_version: String,
    pub mod_loader: String,
    pub select_count: usize,
    pub categories: Option<Vec<CategoryBudget>>,
    pub candidates: Vec<CandidateSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionResponse {
    pub selections: Vec<SelectedMod>,
}

impl LlmScenario for SelectionScenario {
    type Response = SelectionResponse;

    fn name(&self) -> &'static str {
        "final_selection"
    }

    fn system_prompt(&self) -> String {
        PROMPT_BASE.to_string()
    }

    fn temperature(&self) -> f64 {
        0.2
    }

    fn max_tokens(&self) -> u32 {
        8192
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::SelectionRole;

    #[test]
    fn selection_response_parses() {
        let raw = r#"{
            "selections": [
                {"source_id": "AANobbMI", "category_index": 0, "reason": "requested by name", "role": "primary"},
                {"source_id": "P7dR8mSH", "category_index": null, "reason": "required API", "role": "library"}
            ]
        }"#;
        let resp: SelectionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.selections.len(), 2);
        assert_eq!(resp.selections[0].category_index, Some(0));
        assert_eq!(resp.selections[1].category_index, None);
        assert_eq!(resp.selections[1].role, SelectionRole::Library);
    }
}

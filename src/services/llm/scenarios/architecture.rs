//! Architecture-planning scenarios: the category plan drafted before
//! selection and the refinement pass run after dependency resolution.

use serde::{Deserialize, Serialize};

use crate::models::plan::PlannedArchitecture;
use crate::services::llm::gateway::LlmScenario;

const PLAN_PROMPT: &str = r#"You are the pack architect of a Minecraft modpack assembly service.
Design the category structure for a themed modpack before mods are chosen.

You receive the user's request, the target version/loader, a sample of
popular reference packs with a similar theme, and a table of capability
pairs that frequently appear together in those packs.

Rules:
- Produce between 5 and 15 categories.
- Category target_mods must sum approximately to max_mods.
- Every category lists at least one required capability (lowercase dotted
  paths such as "magic.spellcasting").
- Prefer the capability vocabulary observed in the reference packs over
  inventing new paths.
- "pack_archetype" is a two-or-three word label such as "kitchen sink",
  "combat adventure" or "tech expert".

Respond with ONLY a JSON object:
{
  "categories": [{
    "name": str,
    "description": str,
    "required_capabilities": [str],
    "preferred_capabilities": [str],
    "target_mods": int
  }],
  "pack_archetype": str,
  "estimated_total_mods": int
}"#;

const REFINE_PROMPT: &str = r#"You are reorganizing a freshly assembled Minecraft modpack board.
You receive the planned categories and the mods that were actually selected
(with their capabilities). Reassign every mod to a final category list.

Rules:
- Split any category holding more than 15 gameplay mods into 2-3
  sub-categories along capability affinity.
- Merge categories that ended up with fewer than 4 mods into their closest
  sibling.
- Group libraries and exposed APIs into their own category; if 20 or more,
  split them into "APIs", "Core" and "Compatibility".
- Keep names short and player-facing.
- Every selected mod id must appear in exactly one category.

Respond with ONLY a JSON object:
{
  "categories": [{"name": str, "mod_ids": [str]}]
}"#;

// ============================================================================
// Plan call
// ============================================================================

/// Compact view of one mined reference pack.
#[derive(Debug, Clone, Serialize)]
pub struct ReferencePackSummary {
    pub title: String,
    pub description: String,
    pub mod_count: usize,
    pub top_capabilities: Vec<String>,
}

/// How often two capabilities co-occur across the mined references.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityPair {
    pub a: String,
    pub b: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchitecturePlanScenario {
    pub prompt: String,
    pub mc_version: String,
    pub mod_loader: String,
    pub max_mods: i64,
    pub reference_packs: Vec<ReferencePackSummary>,
    pub capability_cooccurrence: Vec<CapabilityPair>,
}

impl LlmScenario for ArchitecturePlanScenario {
    type Response = PlannedArchitecture;

    fn name(&self) -> &'static str {
        "architecture_plan"
    }

    fn system_prompt(&self) -> String {
        PLAN_PROMPT.to_string()
    }

    fn temperature(&self) -> f64 {
        0.4
    }
}

// ============================================================================
// Refine call
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SelectedModSummary {
    pub source_id: String,
    pub name: String,
    pub capabilities: Vec<String>,
    pub is_library: bool,
    pub planned_category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefineScenario {
    pub pack_archetype: String,
    pub planned_categories: Vec<String>,
    pub selected_mods: Vec<SelectedModSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefinedCategory {
    pub name: String,
    pub mod_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefinedLayout {
    pub categories: Vec<RefinedCategory>,
}

impl LlmScenario for RefineScenario {
    type Response = RefinedLayout;

    fn name(&self) -> &'static str {
        "architecture_refine"
    }

    fn system_prompt(&self) -> String {
        REFINE_PROMPT.to_string()
    }

    fn temperature(&self) -> f64 {
        0.2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refined_layout_parses() {
        let raw = r#"{
            "categories": [
                {"name": "Performance", "mod_ids": ["a", "b"]},
                {"name": "Magic", "mod_ids": ["c"]}
            ]
        }"#;
        let layout: RefinedLayout = serde_json::from_str(raw).unwrap();
        assert_eq!(layout.categories.len(), 2);
        assert_eq!(layout.categories[0].mod_ids, vec!["a", "b"]);
    }

    #[test]
    fn plan_scenario_serializes_references() {
        let scenario = ArchitecturePlanScenario {
            prompt: "medieval fantasy".into(),
            mc_version: "1.20.1".into(),
            mod_loader: "neoforge".into(),
            max_mods: 100,
            reference_packs: vec![ReferencePackSummary {
                title: "Medieval MC".into(),
                description: "castles".into(),
                mod_count: 120,
                top_capabilities: vec!["building.decoration".into()],
            }],
            capability_cooccurrence: vec![CapabilityPair {
                a: "combat".into(),
                b: "magic".into(),
                count: 7,
            }],
        };
        let v = serde_json::to_value(&scenario).unwrap();
        assert_eq!(v["reference_packs"][0]["mod_count"], 120);
        assert_eq!(v["capability_cooccurrence"][0]["count"], 7);
    }
}

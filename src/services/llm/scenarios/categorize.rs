//! Standard categorization scenario used by the simple assembly flow and the
//! auto-sort endpoint.

use serde::{Deserialize, Serialize};

use crate::services::llm::gateway::LlmScenario;

/// The fixed bucket set of the simple flow.
pub const STANDARD_CATEGORIES: [&str; 8] =
    ["Performance", "Graphics", "Utility", "World", "Gameplay", "Content", "Libraries", "Other"];

const PROMPT_BASE: &str = r#"You sort Minecraft mods into a fixed set of board categories.

The only valid categories are:
Performance, Graphics, Utility, World, Gameplay, Content, Libraries, Other

Guidance:
- Optimization, FPS and memory mods go to Performance.
- Shaders, rendering and visual-only mods go to Graphics.
- Map, inventory and quality-of-life tools go to Utility.
- World generation, biomes and structures go to World.
- Mechanics and progression go to Gameplay; items, mobs and blocks go to
  Content.
- APIs and dependency libraries go to Libraries.
- Use Other only when nothing else fits.

Assign every listed mod exactly once, preserving the input order.

Respond with ONLY a JSON object:
{
  "assignments": [{"source_id": str, "category": str}]
}"#;

#[derive(Debug, Clone, Serialize)]
pub struct SortableMod {
    pub source_id: String,
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorizeScenario {
    pub mods: Vec<SortableMod>,
    pub max_categories: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryAssignment {
    pub source_id: String,
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorizeResponse {
    pub assignments: Vec<CategoryAssignment>,
}

impl LlmScenario for CategorizeScenario {
    type Response = CategorizeResponse;

    fn name(&self) -> &'static str {
        "categorize"
    }

    fn system_prompt(&self) -> String {
        PROMPT_BASE.to_string()
    }

    fn temperature(&self) -> f64 {
        0.0
    }
}

/// Snap a model-provided category onto the fixed set; anything unknown
/// becomes `Other`.
pub fn canonical_category(raw: &str) -> &'static str {
    let trimmed = raw.trim();
    STANDARD_CATEGORIES
        .iter()
        .find(|c| c.eq_ignore_ascii_case(trimmed))
        .copied()
        .unwrap_or("Other")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_categories() {
        assert_eq!(canonical_category("performance"), "Performance");
        assert_eq!(canonical_category(" Libraries "), "Libraries");
        assert_eq!(canonical_category("Shader Packs"), "Other");
    }

    #[test]
    fn response_parses() {
        let raw = r#"{"assignments": [{"source_id": "a", "category": "Performance"}]}"#;
        let resp: CategorizeResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.assignments[0].category, "Performance");
    }
}

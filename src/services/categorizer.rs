//! Standard categorization for the simple assembly flow and auto-sort.
//!
//! One LLM call maps mods onto the fixed bucket set; anything the model
//! misses or mislabels falls back to capability heuristics so the board
//! never ends up with uncategorized mods.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::models::mods::ModEntry;
use crate::services::llm::scenarios::categorize::{
    CategorizeScenario, STANDARD_CATEGORIES, SortableMod, canonical_category,
};
use crate::services::llm::{LlmError, LlmGateway};
use crate::services::tracer::PipelineTracer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizedGroup {
    pub name: String,
    pub mod_ids: Vec<String>,
}

pub struct Categorizer {
    gateway: Arc<LlmGateway>,
}

impl Categorizer {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Categorize catalog mods. Input is sorted by source id first so the
    /// call is deterministic for a given selection.
    pub async fn categorize(
        &self,
        mods: &[ModEntry],
        tracer: &PipelineTracer,
        cancel: &CancellationToken,
    ) -> Result<Vec<CategorizedGroup>, LlmError> {
        let mut ordered: Vec<&ModEntry> = mods.iter().collect();
        ordered.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let scenario = CategorizeScenario {
            mods: ordered
                .iter()
                .map(|m| SortableMod {
                    source_id: m.source_id.clone(),
                    name: m.name.clone(),
                    description: m.summary.clone(),
                    capabilities: m.capabilities.iter().cloned().collect(),
                })
                .collect(),
            max_categories: None,
        };

        let response = self.gateway.call(&scenario, tracer, cancel).await?;

        let mut assigned: HashMap<&str, &'static str> = HashMap::new();
        for assignment in &response.assignments {
            assigned
                .entry(assignment.source_id.as_str())
                .or_insert_with(|| canonical_category(&assignment.category));
        }

        let mut groups: HashMap<&'static str, Vec<String>> = HashMap::new();
        for entry in ordered {
            let category = assigned
                .get(entry.source_id.as_str())
                .copied()
                .unwrap_or_else(|| heuristic_category(entry));
            groups.entry(category).or_default().push(entry.source_id.clone());
        }

        Ok(into_standard_order(groups))
    }

    /// Sort loose mod descriptions (not necessarily in the catalog), as used
    /// by the auto-sort endpoint.
    pub async fn sort_loose(
        &self,
        mods: Vec<SortableMod>,
        max_categories: Option<usize>,
        tracer: &PipelineTracer,
        cancel: &CancellationToken,
    ) -> Result<Vec<CategorizedGroup>, LlmError> {
        let ids: Vec<String> = mods.iter().map(|m| m.source_id.clone()).collect();
        let scenario = CategorizeScenario { mods, max_categories };
        let response = self.gateway.call(&scenario, tracer, cancel).await?;

        let mut assigned: HashMap<String, &'static str> = HashMap::new();
        for assignment in response.assignments {
            let category = canonical_category(&assignment.category);
            assigned.entry(assignment.source_id).or_insert(category);
        }

        let mut groups: HashMap<&'static str, Vec<String>> = HashMap::new();
        for id in ids {
            let category = assigned.get(&id).copied().unwrap_or("Other");
            groups.entry(category).or_default().push(id);
        }

        Ok(into_standard_order(groups))
    }
}

fn into_standard_order(mut groups: HashMap<&'static str, Vec<String>>) -> Vec<CategorizedGroup> {
    STANDARD_CATEGORIES
        .iter()
        .filter_map(|name| {
            groups
                .remove(name)
                .map(|mod_ids| CategorizedGroup { name: name.to_string(), mod_ids })
        })
        .collect()
}

/// Capability/tag heuristic used when the model skips a mod.
pub fn heuristic_category(entry: &ModEntry) -> &'static str {
    if entry.is_library() {
        return "Libraries";
    }

    let prefix_map: [(&str, &str); 12] = [
        ("performance", "Performance"),
        ("graphics", "Graphics"),
        ("shader", "Graphics"),
        ("render", "Graphics"),
        ("utility", "Utility"),
        ("storage", "Utility"),
        ("map", "Utility"),
        ("worldgen", "World"),
        ("biome", "World"),
        ("structure", "World"),
        ("gameplay", "Gameplay"),
        ("adventure", "Gameplay"),
    ];

    for capability in &entry.capabilities {
        for (prefix, category) in &prefix_map {
            if capability.starts_with(prefix) {
                return category;
            }
        }
    }

    let content_markers = ["mobs", "items", "food", "equipment", "blocks"];
    for capability in &entry.capabilities {
        if content_markers.iter().any(|m| capability.starts_with(m)) {
            return "Content";
        }
    }

    for tag in entry.tags.iter().chain(entry.modrinth_categories.iter()) {
        let tag = tag.to_lowercase();
        if tag.contains("optimization") || tag.contains("performance") {
            return "Performance";
        }
        if tag.contains("library") {
            return "Libraries";
        }
        if tag.contains("world") {
            return "World";
        }
    }

    "Other"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn make_mod(source_id: &str, caps: &[&str], tags: &[&str]) -> ModEntry {
        ModEntry {
            source_id: source_id.to_string(),
            slug: source_id.to_string(),
            name: source_id.to_string(),
            summary: String::new(),
            description: String::new(),
            icon_url: None,
            loaders: ["fabric".to_string()].into(),
            game_versions: HashSet::new(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            modrinth_categories: HashSet::new(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            dependencies: Vec::new(),
            incompatibilities: HashMap::new(),
            downloads: 0,
            followers: 0,
            embedding: None,
        }
    }

    #[test]
    fn heuristics_cover_the_bucket_set() {
        assert_eq!(heuristic_category(&make_mod("a", &["performance.render"], &[])), "Performance");
        assert_eq!(heuristic_category(&make_mod("b", &["shader.core"], &[])), "Graphics");
        assert_eq!(heuristic_category(&make_mod("c", &["worldgen.biomes"], &[])), "World");
        assert_eq!(heuristic_category(&make_mod("d", &["dependency.library"], &[])), "Libraries");
        assert_eq!(heuristic_category(&make_mod("e", &["mobs.hostile"], &[])), "Content");
        assert_eq!(heuristic_category(&make_mod("f", &[], &["optimization"])), "Performance");
        assert_eq!(heuristic_category(&make_mod("g", &[], &[])), "Other");
    }

    #[test]
    fn groups_follow_standard_order() {
        let mut groups: HashMap<&'static str, Vec<String>> = HashMap::new();
        groups.insert("Other", vec!["x".into()]);
        groups.insert("Performance", vec!["y".into()]);

        let ordered = into_standard_order(groups);
        assert_eq!(ordered[0].name, "Performance");
        assert_eq!(ordered[1].name, "Other");
    }
}

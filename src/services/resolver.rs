//! Dependency resolution: breadth-first closure of required dependencies
//! with loader/version gating and bidirectional incompatibility detection.
//!
//! Resolved dependencies never count against the user's mod cap. Conflicts
//! are reported, not auto-resolved.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::models::mods::ModEntry;
use crate::services::mod_store::{ModStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Conflict {
    pub a: String,
    pub b: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Unresolved {
    pub source_id: String,
    pub missing_reason: String,
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub added_dependencies: Vec<ModEntry>,
    pub conflicts: Vec<Conflict>,
    pub unresolved: Vec<Unresolved>,
}

pub struct DependencyResolver {
    store: Arc<ModStore>,
}

impl DependencyResolver {
    pub fn new(store: Arc<ModStore>) -> Self {
        Self { store }
    }

    /// Close the selection over `required` dependencies for the target.
    pub async fn resolve(
        &self,
        selection: &[ModEntry],
        loader: &str,
        mc_version: &str,
    ) -> Result<Resolution, StoreError> {
        let mut resolution = Resolution::default();

        // Visited covers the selection itself, so cycles and back-edges into
        // the selection terminate.
        let mut visited: HashSet<String> =
            selection.iter().map(|m| m.source_id.clone()).collect();

        let mut frontier: Vec<String> = selection
            .iter()
            .flat_map(|m| m.required_dependency_ids().map(str::to_string))
            .filter(|id| visited.insert(id.clone()))
            .collect();

        while !frontier.is_empty() {
            let fetched = self.store.get_mods(&frontier).await?;
            let fetched_ids: HashSet<&str> =
                fetched.iter().map(|m| m.source_id.as_str()).collect();

            for id in &frontier {
                if !fetched_ids.contains(id.as_str()) {
                    resolution.unresolved.push(Unresolved {
                        source_id: id.clone(),
                        missing_reason: "not indexed in the mod catalog".to_string(),
                    });
                }
            }

            let mut next_frontier = Vec::new();
            for dep in fetched {
                if !dep.supports_loader(loader) {
                    resolution.unresolved.push(Unresolved {
                        source_id: dep.source_id.clone(),
                        missing_reason: format!("no build for loader {}", loader),
                    });
                    continue;
                }
                if !dep.supports_game_version(mc_version) {
                    resolution.unresolved.push(Unresolved {
                        source_id: dep.source_id.clone(),
                        missing_reason: format!("no build for game version {}", mc_version),
                    });
                    continue;
                }

                next_frontier.extend(
                    dep.required_dependency_ids()
                        .filter(|id| visited.insert(id.to_string()))
                        .map(str::to_string),
                );
                resolution.added_dependencies.push(dep);
            }

            frontier = next_frontier;
        }

        resolution.added_dependencies.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        resolution.conflicts =
            detect_conflicts(selection, &resolution.added_dependencies, loader);

        Ok(resolution)
    }
}

/// Scan selection ∪ dependencies pairwise; a conflict exists when either
/// side declares the other incompatible under the target loader.
fn detect_conflicts(
    selection: &[ModEntry],
    dependencies: &[ModEntry],
    loader: &str,
) -> Vec<Conflict> {
    let all: Vec<&ModEntry> = selection.iter().chain(dependencies.iter()).collect();
    let by_id: HashMap<&str, &ModEntry> =
        all.iter().map(|m| (m.source_id.as_str(), *m)).collect();

    let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
    let mut conflicts = Vec::new();

    for declaring in &all {
        for incompatible_id in declaring.incompatible_ids(loader) {
            let Some(other) = by_id.get(incompatible_id) else {
                continue;
            };

            let mut pair =
                [declaring.source_id.clone(), other.source_id.clone()];
            pair.sort();
            if !seen_pairs.insert((pair[0].clone(), pair[1].clone())) {
                continue;
            }

            conflicts.push(Conflict {
                a: declaring.source_id.clone(),
                b: other.source_id.clone(),
                reason: format!(
                    "{} declares {} incompatible on {}",
                    declaring.slug, other.slug, loader
                ),
            });
        }
    }

    conflicts.sort_by(|x, y| (&x.a, &x.b).cmp(&(&y.a, &y.b)));
    conflicts
}

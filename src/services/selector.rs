//! Final selection: a local pre-filter narrows the candidate list to a
//! small pool, then one LLM call picks the pack. The model's output is
//! sanitized against the pool before anything downstream sees it.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::models::mods::ModEntry;
use crate::models::plan::{PlannedArchitecture, SelectedMod, SelectionRole};
use crate::services::llm::scenarios::selection::{
    CandidateSummary, CategoryBudget, SelectionScenario,
};
use crate::services::llm::{LlmError, LlmGateway};
use crate::services::retrieval::Candidate;
use crate::services::tracer::PipelineTracer;

/// Candidates kept per planned category by the local pre-filter.
const TOP_PER_CATEGORY: usize = 6;
/// Upper bound on the pool handed to the model.
const POOL_CAP: usize = 50;

pub struct FinalSelector {
    gateway: Arc<LlmGateway>,
}

impl FinalSelector {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Score every candidate against every planned category and keep the
    /// top slice per category. No LLM involved.
    pub fn prefilter_pool(
        candidates: &[Candidate],
        architecture: &PlannedArchitecture,
    ) -> Vec<ModEntry> {
        let mut picked: Vec<(f64, &ModEntry)> = Vec::new();
        let mut picked_ids: HashSet<&str> = HashSet::new();

        for category in &architecture.categories {
            let mut scored: Vec<(f64, &ModEntry)> = candidates
                .iter()
                .map(|c| (category_fit_score(&c.entry, category), &c.entry))
                .filter(|(score, _)| *score > 0.0)
                .collect();
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.source_id.cmp(&b.1.source_id))
            });

            for (score, entry) in scored.into_iter().take(TOP_PER_CATEGORY) {
                if picked_ids.insert(entry.source_id.as_str()) {
                    picked.push((score, entry));
                }
            }
        }

        picked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.source_id.cmp(&b.1.source_id))
        });
        picked.truncate(POOL_CAP);
        picked.into_iter().map(|(_, e)| e.clone()).collect()
    }

    /// One LLM selection call over the pool, post-validated.
    #[allow(clippy::too_many_arguments)]
    pub async fn select(
        &self,
        prompt: &str,
        mc_version: &str,
        mod_loader: &str,
        max_mods: i64,
        architecture: Option<&PlannedArchitecture>,
        pool: &[ModEntry],
        tracer: &PipelineTracer,
        cancel: &CancellationToken,
    ) -> Result<Vec<SelectedMod>, LlmError> {
        let select_count = (max_mods.max(0) as usize).min(pool.len());
        if select_count == 0 {
            return Ok(Vec::new());
        }

        let scenario = SelectionScenario {
            prompt: prompt.to_string(),
            mc_version: mc_version.to_string(),
            mod_loader: mod_loader.to_string(),
            select_count,
            categories: architecture.map(|arch| {
                arch.categories
                    .iter()
                    .enumerate()
                    .map(|(index, c)| CategoryBudget {
                        index,
                        name: c.name.clone(),
                        required_capabilities: c.required_capabilities.clone(),
                        target_mods: c.target_mods,
                    })
                    .collect()
            }),
            candidates: pool
                .iter()
                .map(|m| CandidateSummary {
                    source_id: m.source_id.clone(),
                    name: m.name.clone(),
                    summary: m.summary.clone(),
                    capabilities: m.capabilities.iter().cloned().collect(),
                    downloads: m.downloads,
                })
                .collect(),
        };

        let response = self.gateway.call(&scenario, tracer, cancel).await?;
        Ok(sanitize_selection(response.selections, pool, architecture, select_count))
    }
}

/// Local fit score: `5·|caps ∩ required| + 2·|caps ∩ preferred| +
/// min(log10(downloads+1), 3)`.
fn category_fit_score(entry: &ModEntry, category: &crate::models::plan::PlannedCategory) -> f64 {
    let required_hits = category
        .required_capabilities
        .iter()
        .filter(|c| entry.capabilities.contains(*c))
        .count() as f64;
    let preferred_hits = category
        .preferred_capabilities
        .iter()
        .filter(|c| entry.capabilities.contains(*c))
        .count() as f64;

    if required_hits == 0.0 && preferred_hits == 0.0 {
        return 0.0;
    }

    let popularity = ((entry.downloads + 1) as f64).log10().min(3.0);
    5.0 * required_hits + 2.0 * preferred_hits + popularity
}

/// Enforce the selection post-conditions: pool membership, no duplicates,
/// valid category indexes, exact count, and required-category coverage where
/// the pool permits.
fn sanitize_selection(
    raw: Vec<SelectedMod>,
    pool: &[ModEntry],
    architecture: Option<&PlannedArchitecture>,
    want: usize,
) -> Vec<SelectedMod> {
    let pool_ids: HashSet<&str> = pool.iter().map(|m| m.source_id.as_str()).collect();
    let category_count = architecture.map(|a| a.categories.len()).unwrap_or(0);

    let mut seen: HashSet<String> = HashSet::new();
    let mut selections: Vec<SelectedMod> = raw
        .into_iter()
        .filter(|s| pool_ids.contains(s.source_id.as_str()))
        .filter(|s| seen.insert(s.source_id.clone()))
        .map(|mut s| {
            if let Some(idx) = s.category_index
                && idx >= category_count
            {
                s.category_index = None;
            }
            s
        })
        .collect();

    selections.truncate(want);

    // Backfill from the ranked pool when the model under-selected.
    if selections.len() < want {
        for entry in pool {
            if selections.len() >= want {
                break;
            }
            if seen.insert(entry.source_id.clone()) {
                selections.push(SelectedMod {
                    source_id: entry.source_id.clone(),
                    category_index: None,
                    reason: "added to reach the requested pack size".to_string(),
                    role: if entry.is_library() {
                        SelectionRole::Library
                    } else {
                        SelectionRole::Primary
                    },
                });
            }
        }
    }

    // Required-capability coverage: every category whose requirement the
    // pool can satisfy gets at least one selection.
    if let Some(arch) = architecture {
        for (index, category) in arch.categories.iter().enumerate() {
            let covered = selections.iter().any(|s| s.category_index == Some(index));
            if covered {
                continue;
            }

            // Prefer re-labeling an already selected mod that fits.
            if let Some(fit) = selections.iter_mut().find(|s| {
                s.category_index.is_none()
                    && pool
                        .iter()
                        .find(|m| m.source_id == s.source_id)
                        .is_some_and(|m| {
                            category.required_capabilities.iter().any(|c| m.capabilities.contains(c))
                        })
            }) {
                fit.category_index = Some(index);
                continue;
            }

            let selected_ids: HashSet<String> =
                selections.iter().map(|s| s.source_id.clone()).collect();
            let candidate = pool.iter().find(|m| {
                !selected_ids.contains(&m.source_id)
                    && category.required_capabilities.iter().any(|c| m.capabilities.contains(c))
            });

            if let Some(entry) = candidate {
                let replacement = SelectedMod {
                    source_id: entry.source_id.clone(),
                    category_index: Some(index),
                    reason: format!("covers the {} category requirement", category.name),
                    role: SelectionRole::Primary,
                };
                if selections.len() < want {
                    selections.push(replacement);
                } else if let Some(slot) = find_replaceable_slot(&selections, arch) {
                    selections[slot] = replacement;
                }
            }
        }
    }

    selections
}

/// A slot safe to sacrifice: the last selection of any category that holds
/// more than one.
fn find_replaceable_slot(
    selections: &[SelectedMod],
    architecture: &PlannedArchitecture,
) -> Option<usize> {
    for index in (0..architecture.categories.len()).rev() {
        let members: Vec<usize> = selections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.category_index == Some(index))
            .map(|(i, _)| i)
            .collect();
        if members.len() > 1 {
            return members.last().copied();
        }
    }
    None
}

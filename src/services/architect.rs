//! Architecture planning for themed packs.
//!
//! The planner mines reference modpacks for vocabulary and baselines, asks
//! the model for a category plan, and after selection/resolution reorganizes
//! the actual mods into a final category layout. The model proposes and the
//! rules here dispose: every structural guarantee (category counts, target
//! sums, splits, merges, library grouping) is enforced locally.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::models::modpack::RefModpack;
use crate::models::mods::{ModEntry, is_valid_capability};
use crate::models::plan::{PlannedArchitecture, PlannedCategory};
use crate::services::categorizer::CategorizedGroup;
use crate::services::llm::scenarios::architecture::{
    ArchitecturePlanScenario, CapabilityPair, ReferencePackSummary, RefineScenario,
    SelectedModSummary,
};
use crate::services::llm::{LlmError, LlmGateway};
use crate::services::mod_store::{ModStore, StoreError};
use crate::services::tracer::PipelineTracer;
use crate::utils::text::jaccard;

/// Reference packs mined per request.
const REFERENCE_K: usize = 10;
/// A mod present in at least this share of references is a baseline mod.
const BASELINE_PREVALENCE: f64 = 0.7;
/// Co-occurrence pairs handed to the plan call.
const COOCCURRENCE_TOP: usize = 40;

const MIN_CATEGORIES: usize = 5;
const MAX_CATEGORIES: usize = 15;
/// Tolerated deviation of Σ target_mods from max_mods.
const TARGET_TOLERANCE: f64 = 0.2;

/// Refinement thresholds.
const SPLIT_THRESHOLD: usize = 15;
const MERGE_THRESHOLD: usize = 4;
const MERGE_JACCARD: f64 = 0.4;
const LIBRARY_SPLIT_THRESHOLD: usize = 20;

pub struct MinedReferences {
    pub packs: Vec<RefModpack>,
    /// Baseline mod id -> prevalence across the mined packs.
    pub baseline: HashMap<String, f64>,
    pub cooccurrence: Vec<CapabilityPair>,
}

pub struct ArchitecturePlanner {
    store: Arc<ModStore>,
    gateway: Arc<LlmGateway>,
}

impl ArchitecturePlanner {
    pub fn new(store: Arc<ModStore>, gateway: Arc<LlmGateway>) -> Self {
        Self { store, gateway }
    }

    // ========================================================================
    // Reference mining
    // ========================================================================

    /// Pull the closest reference packs and derive baselines plus the
    /// capability co-occurrence table.
    pub async fn mine_references(
        &self,
        prompt_embedding: &[f32],
        loader: &str,
        mc_version: &str,
    ) -> Result<MinedReferences, StoreError> {
        let hits = self
            .store
            .modpack_vector_search(prompt_embedding, loader, mc_version, REFERENCE_K)
            .await?;
        let packs: Vec<RefModpack> = hits.into_iter().map(|(p, _)| p).collect();

        Ok(MinedReferences {
            baseline: extract_baseline(&packs),
            cooccurrence: extract_cooccurrence(&packs),
            packs,
        })
    }

    // ========================================================================
    // Plan call
    // ========================================================================

    pub async fn plan(
        &self,
        prompt: &str,
        mc_version: &str,
        mod_loader: &str,
        max_mods: i64,
        references: &MinedReferences,
        tracer: &PipelineTracer,
        cancel: &CancellationToken,
    ) -> Result<PlannedArchitecture, LlmError> {
        let scenario = ArchitecturePlanScenario {
            prompt: prompt.to_string(),
            mc_version: mc_version.to_string(),
            mod_loader: mod_loader.to_string(),
            max_mods,
            reference_packs: references
                .packs
                .iter()
                .map(|p| ReferencePackSummary {
                    title: p.title.clone(),
                    description: p.description.clone(),
                    mod_count: p.all_mod_ids().len(),
                    top_capabilities: pack_capabilities(p).into_iter().take(12).collect(),
                })
                .collect(),
            capability_cooccurrence: references.cooccurrence.clone(),
        };

        let raw = self.gateway.call(&scenario, tracer, cancel).await?;
        Ok(normalize_architecture(raw, max_mods))
    }

    // ========================================================================
    // Refine call
    // ========================================================================

    /// Reorganize the actual selection into the final category layout. The
    /// model output is advisory; the structural rules are enforced locally,
    /// and a model failure degrades to a purely local layout.
    pub async fn refine(
        &self,
        plan: &PlannedArchitecture,
        selected: &[ModEntry],
        planned_category_of: &HashMap<String, usize>,
        tracer: &PipelineTracer,
        cancel: &CancellationToken,
    ) -> Result<Vec<CategorizedGroup>, LlmError> {
        let scenario = RefineScenario {
            pack_archetype: plan.pack_archetype.clone(),
            planned_categories: plan.categories.iter().map(|c| c.name.clone()).collect(),
            selected_mods: selected
                .iter()
                .map(|m| SelectedModSummary {
                    source_id: m.source_id.clone(),
                    name: m.name.clone(),
                    capabilities: m.capabilities.iter().cloned().collect(),
                    is_library: m.is_library(),
                    planned_category: planned_category_of
                        .get(&m.source_id)
                        .and_then(|&i| plan.categories.get(i))
                        .map(|c| c.name.clone()),
                })
                .collect(),
        };

        let proposed = match self.gateway.call(&scenario, tracer, cancel).await {
            Ok(layout) => layout
                .categories
                .into_iter()
                .map(|c| CategorizedGroup { name: c.name, mod_ids: c.mod_ids })
                .collect(),
            Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
            Err(e) => {
                tracing::warn!("refinement call failed, using planned layout: {}", e);
                groups_from_plan(plan, selected, planned_category_of)
            },
        };

        Ok(enforce_refinement_rules(proposed, plan, selected))
    }
}

// ============================================================================
// Mining helpers
// ============================================================================

fn extract_baseline(packs: &[RefModpack]) -> HashMap<String, f64> {
    if packs.is_empty() {
        return HashMap::new();
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for pack in packs {
        for id in pack.all_mod_ids() {
            *counts.entry(id).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .filter_map(|(id, count)| {
            let prevalence = count as f64 / packs.len() as f64;
            (prevalence >= BASELINE_PREVALENCE).then(|| (id.to_string(), prevalence))
        })
        .collect()
}

/// All capability paths a pack's architecture mentions, most frequent first.
fn pack_capabilities(pack: &RefModpack) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for category in &pack.architecture.categories {
        for cap in category
            .required_capabilities
            .iter()
            .chain(category.preferred_capabilities.iter())
            .chain(category.providers.keys())
        {
            *counts.entry(cap.as_str()).or_default() += 1;
        }
    }

    let mut caps: Vec<(&str, usize)> = counts.into_iter().collect();
    caps.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    caps.into_iter().map(|(c, _)| c.to_string()).collect()
}

fn extract_cooccurrence(packs: &[RefModpack]) -> Vec<CapabilityPair> {
    let mut counts: HashMap<(String, String), usize> = HashMap::new();

    for pack in packs {
        let caps: Vec<String> = {
            let set: HashSet<String> = pack_capabilities(pack).into_iter().collect();
            let mut v: Vec<String> = set.into_iter().collect();
            v.sort();
            v
        };
        for i in 0..caps.len() {
            for j in (i + 1)..caps.len() {
                *counts.entry((caps[i].clone(), caps[j].clone())).or_default() += 1;
            }
        }
    }

    let mut pairs: Vec<(String, String, usize)> =
        counts.into_iter().map(|((a, b), n)| (a, b, n)).collect();
    pairs.sort_by(|x, y| y.2.cmp(&x.2).then_with(|| (&x.0, &x.1).cmp(&(&y.0, &y.1))));
    pairs
        .into_iter()
        .take(COOCCURRENCE_TOP)
        .map(|(a, b, count)| CapabilityPair { a, b, count })
        .collect()
}

// ============================================================================
// Plan normalization
// ============================================================================

/// Bring a model-proposed architecture into contract: 5-15 categories, every
/// category with a valid required capability, Σ target_mods within ±20% of
/// max_mods.
pub fn normalize_architecture(
    mut arch: PlannedArchitecture,
    max_mods: i64,
) -> PlannedArchitecture {
    for category in &mut arch.categories {
        category.target_mods = category.target_mods.max(1);
        category.required_capabilities.retain(|c| is_valid_capability(c));
        category.preferred_capabilities.retain(|c| is_valid_capability(c));
        if category.required_capabilities.is_empty() {
            category.required_capabilities.push(capability_from_name(&category.name));
        }
    }
    arch.categories.retain(|c| !c.name.trim().is_empty());

    if arch.categories.len() > MAX_CATEGORIES {
        arch.categories
            .sort_by(|a, b| b.target_mods.cmp(&a.target_mods).then_with(|| a.name.cmp(&b.name)));
        arch.categories.truncate(MAX_CATEGORIES);
    }

    // Too few categories: split the largest until the floor is met.
    while arch.categories.len() < MIN_CATEGORIES && !arch.categories.is_empty() {
        let (largest_idx, _) = arch
            .categories
            .iter()
            .enumerate()
            .max_by_key(|(_, c)| c.target_mods)
            .expect("non-empty");
        if arch.categories[largest_idx].target_mods < 2 {
            break;
        }
        let half = arch.categories[largest_idx].target_mods / 2;
        arch.categories[largest_idx].target_mods -= half;
        let twin = PlannedCategory {
            name: format!("{} II", arch.categories[largest_idx].name),
            description: arch.categories[largest_idx].description.clone(),
            required_capabilities: arch.categories[largest_idx].required_capabilities.clone(),
            preferred_capabilities: arch.categories[largest_idx].preferred_capabilities.clone(),
            target_mods: half,
        };
        arch.categories.push(twin);
    }

    // Rescale targets into the ±20% band around max_mods.
    let total = arch.total_target_mods();
    if total > 0 && max_mods > 0 {
        let deviation = (total - max_mods).abs() as f64 / max_mods as f64;
        if deviation > TARGET_TOLERANCE {
            let scale = max_mods as f64 / total as f64;
            for category in &mut arch.categories {
                category.target_mods =
                    ((category.target_mods as f64 * scale).round() as i64).max(1);
            }
            // Rounding drift lands on the largest category.
            let drift = max_mods - arch.total_target_mods();
            if drift != 0
                && let Some(largest) =
                    arch.categories.iter_mut().max_by_key(|c| c.target_mods)
            {
                largest.target_mods = (largest.target_mods + drift).max(1);
            }
        }
    }

    arch.estimated_total_mods = arch.total_target_mods();
    arch
}

/// Derive a usable capability path from a category name.
fn capability_from_name(name: &str) -> String {
    let token: String = name
        .to_lowercase()
        .chars()
        .skip_while(|c| !c.is_ascii_alphanumeric())
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if token.is_empty() { "gameplay".to_string() } else { token }
}

// ============================================================================
// Refinement rules
// ============================================================================

/// Fallback layout straight from the plan when the refine call is unusable.
fn groups_from_plan(
    plan: &PlannedArchitecture,
    selected: &[ModEntry],
    planned_category_of: &HashMap<String, usize>,
) -> Vec<CategorizedGroup> {
    let mut groups: Vec<CategorizedGroup> = plan
        .categories
        .iter()
        .map(|c| CategorizedGroup { name: c.name.clone(), mod_ids: Vec::new() })
        .collect();

    for entry in selected {
        let idx = planned_category_of
            .get(&entry.source_id)
            .copied()
            .filter(|&i| i < groups.len());
        match idx {
            Some(i) => groups[i].mod_ids.push(entry.source_id.clone()),
            None => {
                if groups.is_empty() {
                    groups.push(CategorizedGroup { name: "Mods".into(), mod_ids: Vec::new() });
                }
                let best = best_group_for(entry, &groups, plan, selected);
                groups[best].mod_ids.push(entry.source_id.clone());
            },
        }
    }

    groups
}

/// Apply the structural refinement rules to a proposed layout.
pub fn enforce_refinement_rules(
    proposed: Vec<CategorizedGroup>,
    plan: &PlannedArchitecture,
    selected: &[ModEntry],
) -> Vec<CategorizedGroup> {
    let by_id: HashMap<&str, &ModEntry> =
        selected.iter().map(|m| (m.source_id.as_str(), m)).collect();

    // 1. Validate ids: drop hallucinated, deduplicate multi-assignment by
    //    classification priority, remember what is still unassigned.
    let mut groups: Vec<CategorizedGroup> = proposed
        .into_iter()
        .map(|mut g| {
            g.mod_ids.retain(|id| by_id.contains_key(id.as_str()));
            g
        })
        .filter(|g| !g.name.trim().is_empty())
        .collect();
    if groups.is_empty() {
        groups.push(CategorizedGroup { name: "Mods".into(), mod_ids: Vec::new() });
    }

    resolve_duplicate_assignments(&mut groups, plan, selected);

    let assigned: HashSet<String> =
        groups.iter().flat_map(|g| g.mod_ids.iter().cloned()).collect();
    let unassigned: Vec<&ModEntry> = selected
        .iter()
        .filter(|m| !assigned.contains(&m.source_id))
        .collect();
    for entry in unassigned {
        let best = best_group_for(entry, &groups, plan, selected);
        groups[best].mod_ids.push(entry.source_id.clone());
    }

    // 2. Libraries live in their own group(s).
    groups = separate_libraries(groups, &by_id);

    // 3. Split oversized gameplay categories along capability affinity.
    groups = split_oversized(groups, &by_id);

    // 4. Merge undersized categories into their nearest sibling.
    groups = merge_undersized(groups, &by_id);

    groups.retain(|g| !g.mod_ids.is_empty());
    groups
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CategoryKind {
    Performance,
    Graphics,
    Library,
    Gameplay,
}

fn category_kind(name: &str) -> CategoryKind {
    let name = name.to_lowercase();
    if name.contains("perf") || name.contains("optim") {
        CategoryKind::Performance
    } else if name.contains("graphic") || name.contains("visual") || name.contains("shader") {
        CategoryKind::Graphics
    } else if name.contains("librar") || name.contains("api") || name.contains("core") {
        CategoryKind::Library
    } else {
        CategoryKind::Gameplay
    }
}

fn has_performance_signal(entry: &ModEntry) -> bool {
    entry.capabilities.iter().any(|c| c.starts_with("performance"))
}

fn has_graphics_signal(entry: &ModEntry) -> bool {
    entry
        .capabilities
        .iter()
        .any(|c| c.starts_with("graphics") || c.starts_with("shader") || c.starts_with("render"))
}

/// Classification priority when a mod could live in several categories:
/// performance (90) and graphics (90) outrank library (80, or 90 when the
/// mod has no performance/graphics signal) outrank gameplay (75).
fn classification_priority(entry: &ModEntry, kind: CategoryKind) -> i64 {
    match kind {
        CategoryKind::Performance if has_performance_signal(entry) => 90,
        CategoryKind::Graphics if has_graphics_signal(entry) => 90,
        CategoryKind::Library if entry.is_library() => {
            if has_performance_signal(entry) || has_graphics_signal(entry) { 80 } else { 90 }
        },
        CategoryKind::Gameplay => 75,
        _ => 0,
    }
}

fn group_capability_profile(
    group: &CategorizedGroup,
    by_id: &HashMap<&str, &ModEntry>,
) -> HashSet<String> {
    group
        .mod_ids
        .iter()
        .filter_map(|id| by_id.get(id.as_str()))
        .flat_map(|m| m.capabilities.iter().cloned())
        .collect()
}

/// Remaining target fill for a group, matched to the plan by name; groups
/// with more room win ties.
fn remaining_fill(group: &CategorizedGroup, plan: &PlannedArchitecture) -> i64 {
    plan.categories
        .iter()
        .find(|c| c.name == group.name)
        .map(|c| c.target_mods - group.mod_ids.len() as i64)
        .unwrap_or_else(|| -(group.mod_ids.len() as i64))
}

fn best_group_for(
    entry: &ModEntry,
    groups: &[CategorizedGroup],
    plan: &PlannedArchitecture,
    _selected: &[ModEntry],
) -> usize {
    let mut best = 0usize;
    let mut best_key = (i64::MIN, i64::MIN);

    for (idx, group) in groups.iter().enumerate() {
        let priority = classification_priority(entry, category_kind(&group.name));
        let key = (priority, remaining_fill(group, plan));
        if key > best_key {
            best_key = key;
            best = idx;
        }
    }
    best
}

/// Keep each mod in exactly one group, resolving duplicates by priority and
/// then remaining fill.
fn resolve_duplicate_assignments(
    groups: &mut [CategorizedGroup],
    plan: &PlannedArchitecture,
    selected: &[ModEntry],
) {
    let by_id: HashMap<&str, &ModEntry> =
        selected.iter().map(|m| (m.source_id.as_str(), m)).collect();

    let mut owner: HashMap<String, usize> = HashMap::new();
    for (idx, group) in groups.iter().enumerate() {
        for id in &group.mod_ids {
            let Some(entry) = by_id.get(id.as_str()) else { continue };
            match owner.get(id) {
                None => {
                    owner.insert(id.clone(), idx);
                },
                Some(&current) => {
                    let current_key = (
                        classification_priority(entry, category_kind(&groups[current].name)),
                        remaining_fill(&groups[current], plan),
                    );
                    let challenger_key = (
                        classification_priority(entry, category_kind(&group.name)),
                        remaining_fill(group, plan),
                    );
                    if challenger_key > current_key {
                        owner.insert(id.clone(), idx);
                    }
                },
            }
        }
    }

    for (idx, group) in groups.iter_mut().enumerate() {
        group.mod_ids.retain(|id| owner.get(id) == Some(&idx));
    }
}

fn separate_libraries(
    groups: Vec<CategorizedGroup>,
    by_id: &HashMap<&str, &ModEntry>,
) -> Vec<CategorizedGroup> {
    let mut libraries: Vec<String> = Vec::new();
    let mut out: Vec<CategorizedGroup> = Vec::new();

    for mut group in groups {
        if category_kind(&group.name) == CategoryKind::Library {
            libraries.extend(group.mod_ids.drain(..));
            continue;
        }
        let (libs, rest): (Vec<String>, Vec<String>) = group
            .mod_ids
            .into_iter()
            .partition(|id| by_id.get(id.as_str()).is_some_and(|m| m.is_library()));
        libraries.extend(libs);
        group.mod_ids = rest;
        out.push(group);
    }

    if libraries.is_empty() {
        return out;
    }

    if libraries.len() >= LIBRARY_SPLIT_THRESHOLD {
        let mut apis = Vec::new();
        let mut compat = Vec::new();
        let mut core = Vec::new();
        for id in libraries {
            let entry = by_id.get(id.as_str());
            let is_api =
                entry.is_some_and(|m| m.capabilities.contains("api.exposed"));
            let is_compat = entry
                .is_some_and(|m| m.capabilities.iter().any(|c| c.contains("compat")));
            if is_api {
                apis.push(id);
            } else if is_compat {
                compat.push(id);
            } else {
                core.push(id);
            }
        }
        for (name, mod_ids) in
            [("APIs", apis), ("Core", core), ("Compatibility", compat)]
        {
            if !mod_ids.is_empty() {
                out.push(CategorizedGroup { name: name.to_string(), mod_ids });
            }
        }
    } else {
        out.push(CategorizedGroup { name: "Libraries".to_string(), mod_ids: libraries });
    }

    out
}

fn split_oversized(
    groups: Vec<CategorizedGroup>,
    by_id: &HashMap<&str, &ModEntry>,
) -> Vec<CategorizedGroup> {
    let mut out = Vec::new();

    for group in groups {
        if group.mod_ids.len() <= SPLIT_THRESHOLD
            || category_kind(&group.name) == CategoryKind::Library
        {
            out.push(group);
            continue;
        }

        // Cluster by leading capability segment, then fold the smallest
        // clusters together until at most three remain.
        let mut clusters: HashMap<String, Vec<String>> = HashMap::new();
        for id in &group.mod_ids {
            let prefix = by_id
                .get(id.as_str())
                .and_then(|m| {
                    let mut caps: Vec<&String> = m.capabilities.iter().collect();
                    caps.sort();
                    caps.first()
                        .map(|c| c.split('.').next().unwrap_or(c).to_string())
                })
                .unwrap_or_else(|| "misc".to_string());
            clusters.entry(prefix).or_default().push(id.clone());
        }

        let mut clusters: Vec<(String, Vec<String>)> = clusters.into_iter().collect();
        clusters.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
        while clusters.len() > 3 {
            let (_, spill) = clusters.pop().expect("len > 3");
            clusters
                .last_mut()
                .expect("at least one cluster")
                .1
                .extend(spill);
        }

        if clusters.len() < 2 {
            out.push(group);
            continue;
        }

        for (prefix, mod_ids) in clusters {
            out.push(CategorizedGroup {
                name: format!("{} ({})", group.name, title_case(&prefix)),
                mod_ids,
            });
        }
    }

    out
}

fn merge_undersized(
    mut groups: Vec<CategorizedGroup>,
    by_id: &HashMap<&str, &ModEntry>,
) -> Vec<CategorizedGroup> {
    // Groups that found no similar-enough sibling stand as they are.
    let mut unmergeable: HashSet<String> = HashSet::new();

    loop {
        let Some(small_idx) = groups
            .iter()
            .enumerate()
            .find(|(_, g)| {
                !g.mod_ids.is_empty()
                    && g.mod_ids.len() < MERGE_THRESHOLD
                    && category_kind(&g.name) != CategoryKind::Library
                    && !unmergeable.contains(&g.name)
            })
            .map(|(i, _)| i)
        else {
            break;
        };

        let small_profile = group_capability_profile(&groups[small_idx], by_id);
        let sibling = groups
            .iter()
            .enumerate()
            .filter(|(i, g)| {
                *i != small_idx
                    && !g.mod_ids.is_empty()
                    && category_kind(&g.name) != CategoryKind::Library
            })
            .map(|(i, g)| (i, jaccard(&small_profile, &group_capability_profile(g, by_id))))
            .filter(|(_, similarity)| *similarity >= MERGE_JACCARD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match sibling {
            Some((target_idx, _)) => {
                let small = groups.remove(small_idx);
                let target_idx = if target_idx > small_idx { target_idx - 1 } else { target_idx };
                groups[target_idx].mod_ids.extend(small.mod_ids);
            },
            // nothing similar enough; the small category stands
            None => {
                unmergeable.insert(groups[small_idx].name.clone());
            },
        }
    }
    groups
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

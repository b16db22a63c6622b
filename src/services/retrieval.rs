//! Hybrid retrieval: vector + lexical search fused with weighted Reciprocal
//! Rank Fusion.
//!
//! Each plan query runs as its own search (semantic ≈ top 40, keyword ≈ top
//! 150); results are fused with `score = Σ w · 1/(60 + rank)`, baseline mods
//! get an additive boost scaled by their prevalence among the mined
//! reference packs, and post-filters drop anything incompatible with the
//! target loader/version or under the download floor. Every candidate keeps
//! a trace of which queries produced it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::mods::{ModEntry, ModFilters};
use crate::models::plan::{QueryKind, SearchPlan, SearchQuery};
use crate::services::embedder::Embedder;
use crate::services::mod_store::{ModStore, StoreError};

const SEMANTIC_K: usize = 40;
const KEYWORD_K: usize = 150;
/// Rank-fusion constant; the usual RRF k.
const RRF_K: f64 = 60.0;
/// Cap on fused output.
const MAX_CANDIDATES: usize = 300;
/// A fully prevalent baseline mod gets the equivalent of a strong top hit.
const BASELINE_BOOST: f64 = 3.0 / (RRF_K + 1.0);

/// Why a candidate surfaced: one entry per query that returned it.
#[derive(Debug, Clone)]
pub struct QueryContribution {
    pub query: String,
    pub kind: QueryKind,
    /// 1-based rank within that query's result list.
    pub rank: usize,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: ModEntry,
    pub score: f64,
    pub contributions: Vec<QueryContribution>,
    pub baseline_boost: f64,
}

struct RankedList {
    query: SearchQuery,
    entries: Vec<ModEntry>,
}

pub struct HybridRetrieval {
    store: Arc<ModStore>,
    embedder: Arc<dyn Embedder>,
}

impl HybridRetrieval {
    pub fn new(store: Arc<ModStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Run every plan query and fuse the results.
    ///
    /// `baseline_prevalence` maps baseline mod ids to their prevalence among
    /// the mined references (1.0 for mods the user named directly).
    pub async fn retrieve(
        &self,
        plan: &SearchPlan,
        loader: &str,
        mc_version: &str,
        min_downloads: i64,
        baseline_prevalence: &HashMap<String, f64>,
    ) -> Result<Vec<Candidate>, StoreError> {
        let mut handles = Vec::new();
        for query in plan.search_queries.clone() {
            let store = Arc::clone(&self.store);
            let embedder = Arc::clone(&self.embedder);
            let capabilities = plan.capabilities_focus.clone();
            let loader = loader.to_string();
            let mc_version = mc_version.to_string();

            handles.push(tokio::spawn(async move {
                let entries = run_query(
                    &store,
                    embedder.as_ref(),
                    &query,
                    &capabilities,
                    &loader,
                    &mc_version,
                    min_downloads,
                )
                .await?;
                Ok::<_, StoreError>(RankedList { query, entries })
            }));
        }

        let mut lists = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(list)) => lists.push(list),
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    tracing::error!("retrieval task panicked: {}", e);
                },
            }
        }

        let mut fused = fuse_ranked_lists(&lists);

        // Baseline mods that no query surfaced are still candidates; fetch
        // them directly so explicitly named mods cannot be lost.
        let missing: Vec<String> = baseline_prevalence
            .keys()
            .filter(|id| !fused.contains_key(*id))
            .cloned()
            .collect();
        for entry in self.store.get_mods(&missing).await? {
            fused.insert(
                entry.source_id.clone(),
                Candidate { entry, score: 0.0, contributions: Vec::new(), baseline_boost: 0.0 },
            );
        }

        for (id, prevalence) in baseline_prevalence {
            if let Some(candidate) = fused.get_mut(id) {
                let boost = BASELINE_BOOST * prevalence;
                candidate.baseline_boost = boost;
                candidate.score += boost;
            }
        }

        // Post-filters: target compatibility and the download floor.
        let target = ModFilters::for_target(loader, mc_version).with_min_downloads(min_downloads);
        let mut candidates: Vec<Candidate> =
            fused.into_values().filter(|c| target.matches(&c.entry)).collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.source_id.cmp(&b.entry.source_id))
        });
        candidates.truncate(MAX_CANDIDATES);

        tracing::debug!(
            "hybrid retrieval fused {} queries into {} candidates",
            plan.search_queries.len(),
            candidates.len()
        );

        Ok(candidates)
    }
}

/// Run one plan query. A semantic query whose embedding fails degrades to
/// lexical search over the same text instead of failing the request.
async fn run_query(
    store: &ModStore,
    embedder: &dyn Embedder,
    query: &SearchQuery,
    capabilities_focus: &[String],
    loader: &str,
    mc_version: &str,
    min_downloads: i64,
) -> Result<Vec<ModEntry>, StoreError> {
    let filters = ModFilters::for_target(loader, mc_version).with_min_downloads(min_downloads);

    match query.kind {
        QueryKind::Semantic => {
            let filters = filters.with_capabilities(capabilities_focus.to_vec());
            match embedder.embed(&query.text).await {
                Ok(embedding) => {
                    let hits = store.vector_search(&embedding, &filters, SEMANTIC_K).await?;
                    Ok(hits.into_iter().map(|(entry, _)| entry).collect())
                },
                Err(e) => {
                    tracing::warn!(
                        "embedding failed for query '{}', falling back to lexical: {}",
                        query.text,
                        e
                    );
                    store.keyword_search(&query.text, &filters, SEMANTIC_K).await
                },
            }
        },
        QueryKind::Keyword => store.keyword_search(&query.text, &filters, KEYWORD_K).await,
    }
}

/// Weighted RRF across all query result lists, deduplicating by source id.
fn fuse_ranked_lists(lists: &[RankedList]) -> HashMap<String, Candidate> {
    let mut fused: HashMap<String, Candidate> = HashMap::new();

    for list in lists {
        for (idx, entry) in list.entries.iter().enumerate() {
            let rank = idx + 1;
            let increment = list.query.weight / (RRF_K + rank as f64);
            let contribution = QueryContribution {
                query: list.query.text.clone(),
                kind: list.query.kind,
                rank,
                weight: list.query.weight,
            };

            fused
                .entry(entry.source_id.clone())
                .and_modify(|c| {
                    c.score += increment;
                    c.contributions.push(contribution.clone());
                })
                .or_insert_with(|| Candidate {
                    entry: entry.clone(),
                    score: increment,
                    contributions: vec![contribution.clone()],
                    baseline_boost: 0.0,
                });
        }
    }

    fused
}

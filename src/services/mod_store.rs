//! Read-side queries over the mod catalog plus the few tables this service
//! writes (crash sessions, build records, feedback).
//!
//! Catalog rows are written by the external crawler. Embeddings live in the
//! `embedding` blob column; lexical search goes through the `mods_fts` FTS5
//! mirror. Vector search pre-filters candidates in SQL (popularity ordering
//! caps the scan) and ranks by cosine in process.

use sqlx::SqlitePool;

use crate::models::board::BoardState;
use crate::models::crash::CrashSession;
use crate::models::modpack::{ModpackRow, RefModpack};
use crate::models::mods::{ModEntry, ModFilters, ModRow};
use crate::models::user::{User, UserRow};
use crate::services::embedder::cosine_similarity;

/// Upper bound on rows pulled into process for one cosine scan.
const VECTOR_SCAN_CAP: i64 = 4000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt catalog row: {0}")]
    Decode(#[from] serde_json::Error),
}

const MOD_COLUMNS: &str = "source_id, slug, name, summary, description, icon_url, loaders, \
     game_versions, capabilities, modrinth_categories, tags, dependencies, incompatibilities, \
     downloads, followers, embedding";

pub struct ModStore {
    pool: SqlitePool,
}

impl ModStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Catalog reads
    // ========================================================================

    pub async fn get_mod(&self, source_id: &str) -> Result<Option<ModEntry>, StoreError> {
        let row: Option<ModRow> =
            sqlx::query_as(&format!("SELECT {} FROM mods WHERE source_id = ?", MOD_COLUMNS))
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(ModEntry::try_from).transpose().map_err(Into::into)
    }

    /// Batch fetch; order of the result is unspecified.
    pub async fn get_mods(&self, source_ids: &[String]) -> Result<Vec<ModEntry>, StoreError> {
        if source_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; source_ids.len()].join(",");
        let sql = format!(
            "SELECT {} FROM mods WHERE source_id IN ({})",
            MOD_COLUMNS, placeholders
        );

        let mut query = sqlx::query_as::<_, ModRow>(&sql);
        for id in source_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|r| ModEntry::try_from(r).map_err(Into::into))
            .collect()
    }

    /// Look up by slug or display name, case-insensitive. Used when crash
    /// logs and repair suggestions reference mods by human name.
    pub async fn find_by_slug_or_name(&self, ident: &str) -> Result<Option<ModEntry>, StoreError> {
        let row: Option<ModRow> = sqlx::query_as(&format!(
            "SELECT {} FROM mods WHERE slug = lower(?) OR lower(name) = lower(?) LIMIT 1",
            MOD_COLUMNS
        ))
        .bind(ident)
        .bind(ident)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ModEntry::try_from).transpose().map_err(Into::into)
    }

    /// Cosine-ranked nearest mods under the given filters.
    pub async fn vector_search(
        &self,
        query_embedding: &[f32],
        filters: &ModFilters,
        k: usize,
    ) -> Result<Vec<(ModEntry, f32)>, StoreError> {
        let (where_sql, binds) = catalog_filter_sql(filters);
        let sql = format!(
            "SELECT {} FROM mods WHERE embedding IS NOT NULL{} ORDER BY downloads DESC LIMIT {}",
            MOD_COLUMNS, where_sql, VECTOR_SCAN_CAP
        );

        let mut query = sqlx::query_as::<_, ModRow>(&sql);
        for b in &binds {
            query = query.bind(b.clone());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut scored: Vec<(ModEntry, f32)> = Vec::new();
        for row in rows {
            let entry = ModEntry::try_from(row)?;
            if !filters.matches(&entry) {
                continue;
            }
            if let Some(embedding) = &entry.embedding {
                let score = cosine_similarity(query_embedding, embedding);
                scored.push((entry, score));
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Full-text search over name/summary/description/tags.
    pub async fn keyword_search(
        &self,
        terms: &str,
        filters: &ModFilters,
        k: usize,
    ) -> Result<Vec<ModEntry>, StoreError> {
        let Some(match_expr) = fts_match_expr(terms) else {
            return Ok(Vec::new());
        };

        let (where_sql, binds) = catalog_filter_sql(filters);
        let sql = format!(
            "SELECT {} FROM mods m \
             JOIN (SELECT source_id, rank FROM mods_fts WHERE mods_fts MATCH ? ORDER BY rank LIMIT {}) f \
             ON m.source_id = f.source_id \
             WHERE 1=1{} ORDER BY f.rank",
            mod_columns_qualified(),
            (k * 4).max(64),
            where_sql
        );

        let mut query = sqlx::query_as::<_, ModRow>(&sql).bind(match_expr);
        for b in &binds {
            query = query.bind(b.clone());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut out = Vec::new();
        for row in rows {
            let entry = ModEntry::try_from(row)?;
            if filters.matches(&entry) {
                out.push(entry);
            }
            if out.len() >= k {
                break;
            }
        }
        Ok(out)
    }

    /// Cosine-ranked reference modpacks compatible with the target.
    pub async fn modpack_vector_search(
        &self,
        query_embedding: &[f32],
        loader: &str,
        mc_version: &str,
        k: usize,
    ) -> Result<Vec<(RefModpack, f32)>, StoreError> {
        let rows: Vec<ModpackRow> = sqlx::query_as(&format!(
            "SELECT source_id, title, description, mc_versions, loaders, architecture, \
             downloads, followers, embedding \
             FROM modpacks WHERE embedding IS NOT NULL \
             AND loaders LIKE ? AND mc_versions LIKE ? \
             ORDER BY downloads DESC LIMIT {}",
            VECTOR_SCAN_CAP
        ))
        .bind(json_contains_pattern(loader))
        .bind(json_contains_pattern(mc_version))
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(RefModpack, f32)> = Vec::new();
        for row in rows {
            let pack = RefModpack::try_from(row)?;
            if !pack.loaders.contains(loader) || !pack.mc_versions.contains(mc_version) {
                continue;
            }
            if let Some(embedding) = &pack.embedding {
                let score = cosine_similarity(query_embedding, embedding);
                scored.push((pack, score));
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    // ========================================================================
    // User reads
    // ========================================================================

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, subscription_tier, daily_requests_used, monthly_requests_used, \
             ai_tokens_used, last_request_date, custom_limits FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose().map_err(Into::into)
    }

    // ========================================================================
    // Service-owned writes
    // ========================================================================

    pub async fn insert_crash_session(&self, session: &CrashSession) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO crash_sessions (id, user_id, crash_log_sanitized, board_state_snapshot, \
             root_cause, error_kind, confidence, suggestions, warnings, patched_board_state, \
             token_usage, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.crash_log_sanitized)
        .bind(serde_json::to_string(&session.board_state_snapshot)?)
        .bind(&session.root_cause)
        .bind(session.error_kind.as_str())
        .bind(session.confidence)
        .bind(serde_json::to_string(&session.suggestions)?)
        .bind(serde_json::to_string(&session.warnings)?)
        .bind(serde_json::to_string(&session.patched_board_state)?)
        .bind(session.token_usage)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_build(
        &self,
        build_id: &str,
        user_id: &str,
        prompt: &str,
        mc_version: &str,
        mod_loader: &str,
        request_type: &str,
        mod_count: i64,
        dependency_count: i64,
        tokens_used: i64,
        cost_usd: f64,
        duration_ms: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO modpack_builds (id, user_id, prompt, mc_version, mod_loader, \
             request_type, mod_count, dependency_count, tokens_used, cost_usd, duration_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(build_id)
        .bind(user_id)
        .bind(prompt)
        .bind(mc_version)
        .bind(mod_loader)
        .bind(request_type)
        .bind(mod_count)
        .bind(dependency_count)
        .bind(tokens_used)
        .bind(cost_usd)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Idempotent by `build_id`: replaying the same feedback keeps one row.
    pub async fn upsert_build_feedback(
        &self,
        build_id: &str,
        user_id: &str,
        rating: i64,
        comment: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO build_feedback (build_id, user_id, rating, comment) VALUES (?, ?, ?, ?) \
             ON CONFLICT(build_id) DO UPDATE SET rating = excluded.rating, comment = excluded.comment",
        )
        .bind(build_id)
        .bind(user_id)
        .bind(rating)
        .bind(comment)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_sort_feedback(
        &self,
        build_id: &str,
        user_id: &str,
        accepted: bool,
        corrections: Option<&serde_json::Value>,
    ) -> Result<(), StoreError> {
        let corrections = corrections.map(serde_json::Value::to_string);
        sqlx::query(
            "INSERT INTO sort_feedback (build_id, user_id, accepted, corrections) VALUES (?, ?, ?, ?) \
             ON CONFLICT(build_id) DO UPDATE SET accepted = excluded.accepted, \
             corrections = excluded.corrections",
        )
        .bind(build_id)
        .bind(user_id)
        .bind(accepted)
        .bind(corrections)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// Snapshot helper used by crash sessions; the patcher works on a clone, the
// stored snapshot is what the user submitted.
pub fn snapshot_board(board: &BoardState) -> BoardState {
    board.clone()
}

// ============================================================================
// SQL helpers
// ============================================================================

fn mod_columns_qualified() -> String {
    MOD_COLUMNS
        .split(", ")
        .map(|c| format!("m.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// JSON-array containment via LIKE; exact membership is re-checked in
/// process after the row is parsed.
fn json_contains_pattern(value: &str) -> String {
    format!("%\"{}\"%", value.replace('%', "").replace('_', ""))
}

/// Build the SQL pre-filter for catalog searches. Loader and version use the
/// LIKE containment approximation; downloads filter exactly.
fn catalog_filter_sql(filters: &ModFilters) -> (String, Vec<String>) {
    let mut sql = String::new();
    let mut binds = Vec::new();

    if let Some(loader) = &filters.loader {
        sql.push_str(" AND (loaders LIKE ? OR loaders LIKE ?)");
        binds.push(json_contains_pattern(loader));
        binds.push(json_contains_pattern(crate::models::mods::UNIVERSAL_LOADER));
    }
    if let Some(version) = &filters.game_version {
        sql.push_str(" AND game_versions LIKE ?");
        binds.push(json_contains_pattern(version));
    }
    if let Some(min) = filters.min_downloads {
        sql.push_str(" AND downloads >= ?");
        binds.push(min.to_string());
    }

    (sql, binds)
}

/// Sanitize raw terms into an FTS5 MATCH expression; `None` when nothing
/// searchable remains.
fn fts_match_expr(terms: &str) -> Option<String> {
    let tokens: Vec<String> = terms
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();

    if tokens.is_empty() { None } else { Some(tokens.join(" OR ")) }
}


#[cfg(test)]
mod tests {
    use super::test_support::{insert_mod, setup_catalog};
    use super::*;
    use crate::models::mods::{DependencyType, ModDependency};
    use crate::services::embedder::l2_normalize;
    use std::collections::{HashMap, HashSet};

    async fn test_store() -> ModStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        setup_catalog(&pool).await;
        ModStore::new(pool)
    }

    fn make_mod(source_id: &str, name: &str, loader: &str, downloads: i64) -> ModEntry {
        ModEntry {
            source_id: source_id.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
            name: name.to_string(),
            summary: format!("{} summary", name),
            description: String::new(),
            icon_url: None,
            loaders: [loader.to_string()].into(),
            game_versions: ["1.21.1".to_string()].into(),
            capabilities: HashSet::new(),
            modrinth_categories: HashSet::new(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            incompatibilities: HashMap::new(),
            downloads,
            followers: 0,
            embedding: None,
        }
    }

    fn embedding_at(dim: usize) -> Vec<f32> {
        let mut v = vec![0.01_f32; 8];
        v[dim] = 1.0;
        l2_normalize(v)
    }

    #[tokio::test]
    async fn batch_get_returns_all_requested() {
        let store = test_store().await;
        insert_mod(store.pool(), &make_mod("a", "Alpha", "fabric", 100)).await;
        insert_mod(store.pool(), &make_mod("b", "Beta", "fabric", 200)).await;
        insert_mod(store.pool(), &make_mod("c", "Gamma", "fabric", 300)).await;

        let mods = store
            .get_mods(&["a".to_string(), "c".to_string(), "missing".to_string()])
            .await
            .unwrap();
        let ids: HashSet<_> = mods.iter().map(|m| m.source_id.as_str()).collect();
        assert_eq!(ids, ["a", "c"].into());
    }

    #[tokio::test]
    async fn keyword_search_filters_by_loader() {
        let store = test_store().await;
        insert_mod(store.pool(), &make_mod("a", "Sodium", "fabric", 9_000_000)).await;
        insert_mod(store.pool(), &make_mod("b", "Sodium Forge Port", "forge", 50_000)).await;

        let filters = ModFilters::for_target("fabric", "1.21.1");
        let hits = store.keyword_search("sodium", &filters, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "a");
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine() {
        let store = test_store().await;
        let mut near = make_mod("near", "Near", "fabric", 10_000);
        near.embedding = Some(embedding_at(0));
        let mut far = make_mod("far", "Far", "fabric", 10_000_000);
        far.embedding = Some(embedding_at(7));
        insert_mod(store.pool(), &near).await;
        insert_mod(store.pool(), &far).await;

        let filters = ModFilters::for_target("fabric", "1.21.1");
        let hits = store
            .vector_search(&embedding_at(0), &filters, 2)
            .await
            .unwrap();
        assert_eq!(hits[0].0.source_id, "near");
        assert!(hits[0].1 > hits[1].1);
    }

    #[tokio::test]
    async fn find_by_slug_or_name_is_case_insensitive() {
        let store = test_store().await;
        insert_mod(store.pool(), &make_mod("a", "Fabric API", "fabric", 1)).await;

        assert!(store.find_by_slug_or_name("fabric-api").await.unwrap().is_some());
        assert!(store.find_by_slug_or_name("FABRIC API").await.unwrap().is_some());
        assert!(store.find_by_slug_or_name("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dependencies_round_trip_through_rows() {
        let store = test_store().await;
        let mut m = make_mod("a", "Alpha", "fabric", 1);
        m.dependencies = vec![ModDependency {
            project_id: "lib".into(),
            dependency_type: DependencyType::Required,
            version_range: None,
        }];
        insert_mod(store.pool(), &m).await;

        let loaded = store.get_mod("a").await.unwrap().unwrap();
        assert_eq!(loaded.required_dependency_ids().collect::<Vec<_>>(), vec!["lib"]);
    }

    #[tokio::test]
    async fn feedback_is_idempotent_by_build_id() {
        let store = test_store().await;
        store
            .upsert_build_feedback("b1", "u1", 4, Some("nice"))
            .await
            .unwrap();
        store
            .upsert_build_feedback("b1", "u1", 2, None)
            .await
            .unwrap();

        let (count, rating): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), MAX(rating) FROM build_feedback WHERE build_id = 'b1'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);
        assert_eq!(rating, 2);
    }
}

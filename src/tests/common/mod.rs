//! Shared fixtures for the pipeline tests: an in-memory catalog, a routing
//! LLM transport that replays scripted JSON per scenario, and fakes for the
//! embedder and the mod registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::board::{BoardCategory, BoardMod, BoardState, Camera, Position};
use crate::models::mods::{DependencyType, ModDependency, ModEntry};
use crate::services::architect::ArchitecturePlanner;
use crate::services::assembly::AssemblyPipeline;
use crate::services::categorizer::Categorizer;
use crate::services::crash::CrashPipeline;
use crate::services::crash::dedup::DedupCache;
use crate::services::embedder::{EmbedError, Embedder, l2_normalize};
use crate::services::llm::{ChatCall, ChatOutcome, LlmError, LlmGateway, LlmTransport, Pricing, TokenUsage};
use crate::services::mod_store::ModStore;
use crate::services::mod_store::test_support::{insert_mod, setup_catalog};
use crate::services::quota::QuotaGate;
use crate::services::registry::{ModRegistry, RegistryError, RegistryProject, RegistryVersion};
use crate::services::resolver::DependencyResolver;
use crate::services::retrieval::HybridRetrieval;
use crate::services::selector::FinalSelector;

// ============================================================================
// Scripted LLM transport
// ============================================================================

/// Routes each chat to a queue of canned replies keyed by scenario, detected
/// from the system prompt.
pub struct RoutingTransport {
    replies: Mutex<HashMap<&'static str, Vec<String>>>,
    pub calls: AtomicUsize,
}

fn scenario_key(system_prompt: &str) -> &'static str {
    if system_prompt.contains("request planner") {
        "query_plan"
    } else if system_prompt.contains("pack architect") {
        "architecture_plan"
    } else if system_prompt.contains("reorganizing") {
        "architecture_refine"
    } else if system_prompt.contains("choosing the final mod list") {
        "final_selection"
    } else if system_prompt.contains("sort Minecraft mods") {
        "categorize"
    } else if system_prompt.contains("crash analyst") {
        "crash_analysis"
    } else {
        "unknown"
    }
}

impl RoutingTransport {
    pub fn new() -> Self {
        Self { replies: Mutex::new(HashMap::new()), calls: AtomicUsize::new(0) }
    }

    /// Queue a reply for the given scenario; replies pop in FIFO order, the
    /// last one repeats.
    pub fn script(&self, scenario: &'static str, reply: serde_json::Value) {
        self.replies
            .lock()
            .unwrap()
            .entry(scenario)
            .or_default()
            .push(reply.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmTransport for RoutingTransport {
    async fn chat(&self, call: &ChatCall) -> Result<ChatOutcome, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = scenario_key(&call.system_prompt);
        let mut replies = self.replies.lock().unwrap();
        let queue = replies
            .get_mut(key)
            .unwrap_or_else(|| panic!("no scripted reply for scenario '{}'", key));
        let content = if queue.len() > 1 { queue.remove(0) } else { queue[0].clone() };
        Ok(ChatOutcome { content, usage: TokenUsage { input: 100, output: 40 } })
    }
}

// ============================================================================
// Fakes
// ============================================================================

/// Deterministic embedder: hashes the text onto one of eight axes.
pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let axis = text.bytes().map(|b| b as usize).sum::<usize>() % 8;
        let mut v = vec![0.05_f32; 8];
        v[axis] = 1.0;
        Ok(l2_normalize(v))
    }
}

pub struct FakeRegistry {
    pub known: Vec<(&'static str, &'static str)>,
}

#[async_trait]
impl ModRegistry for FakeRegistry {
    async fn get_project(
        &self,
        id_or_slug: &str,
    ) -> Result<Option<RegistryProject>, RegistryError> {
        Ok(self
            .known
            .iter()
            .find(|(id, slug)| *id == id_or_slug || *slug == id_or_slug)
            .map(|(id, slug)| RegistryProject {
                id: id.to_string(),
                slug: slug.to_string(),
                title: slug.to_string(),
            }))
    }

    async fn compatible_version(
        &self,
        id_or_slug: &str,
        loader: &str,
        game_version: &str,
    ) -> Result<Option<RegistryVersion>, RegistryError> {
        Ok(self
            .known
            .iter()
            .any(|(id, slug)| *id == id_or_slug || *slug == id_or_slug)
            .then(|| RegistryVersion {
                id: "v1".into(),
                version_number: "1.0.0".into(),
                game_versions: vec![game_version.to_string()],
                loaders: vec![loader.to_string()],
            }))
    }
}

// ============================================================================
// Catalog + harness
// ============================================================================

pub fn catalog_mod(source_id: &str, name: &str, loaders: &[&str], caps: &[&str]) -> ModEntry {
    ModEntry {
        source_id: source_id.to_string(),
        slug: name.to_lowercase().replace(' ', "-"),
        name: name.to_string(),
        summary: format!("{} description", name),
        description: String::new(),
        icon_url: None,
        loaders: loaders.iter().map(|s| s.to_string()).collect(),
        game_versions: ["1.21.1".to_string(), "1.20.1".to_string()].into_iter().collect(),
        capabilities: caps.iter().map(|s| s.to_string()).collect(),
        modrinth_categories: Default::default(),
        tags: Vec::new(),
        dependencies: Vec::new(),
        incompatibilities: HashMap::new(),
        downloads: 1_000_000,
        followers: 1_000,
        embedding: Some(l2_normalize(vec![0.3; 8])),
    }
}

pub fn with_required_dep(mut entry: ModEntry, dep_id: &str) -> ModEntry {
    entry.dependencies.push(ModDependency {
        project_id: dep_id.to_string(),
        dependency_type: DependencyType::Required,
        version_range: None,
    });
    entry
}

/// Insert a reference modpack whose architecture lists the given providers.
pub async fn insert_modpack(
    pool: &SqlitePool,
    source_id: &str,
    title: &str,
    loader: &str,
    mc_version: &str,
    providers: &[(&str, &[&str])],
) {
    let architecture = serde_json::json!({
        "categories": providers
            .iter()
            .map(|(cap, ids)| serde_json::json!({
                "name": cap,
                "required_capabilities": [cap],
                "preferred_capabilities": [],
                "providers": { *cap: ids.iter().collect::<Vec<_>>() },
            }))
            .collect::<Vec<_>>(),
    });

    let embedding = crate::models::mods::encode_embedding(&l2_normalize(vec![0.3; 8]));

    sqlx::query(
        "INSERT INTO modpacks (source_id, title, description, mc_versions, loaders, \
         architecture, downloads, followers, embedding) VALUES (?, ?, '', ?, ?, ?, 100000, 100, ?)",
    )
    .bind(source_id)
    .bind(title)
    .bind(serde_json::json!([mc_version]).to_string())
    .bind(serde_json::json!([loader]).to_string())
    .bind(architecture.to_string())
    .bind(embedding)
    .execute(pool)
    .await
    .expect("insert modpack");
}

pub async fn seed_user(pool: &SqlitePool, user_id: &str, tier: &str) {
    sqlx::query(
        "INSERT INTO users (id, subscription_tier, daily_requests_used, monthly_requests_used, \
         ai_tokens_used, last_request_date, custom_limits) VALUES (?, ?, 0, 0, 0, NULL, NULL)",
    )
    .bind(user_id)
    .bind(tier)
    .execute(pool)
    .await
    .expect("seed user");
}

pub struct Harness {
    pub pool: SqlitePool,
    pub store: Arc<ModStore>,
    pub quota: Arc<QuotaGate>,
    pub transport: Arc<RoutingTransport>,
    pub gateway: Arc<LlmGateway>,
}

impl Harness {
    pub async fn new(catalog: &[ModEntry]) -> Self {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        setup_catalog(&pool).await;
        for entry in catalog {
            insert_mod(&pool, entry).await;
        }

        let store = Arc::new(ModStore::new(pool.clone()));
        let quota = Arc::new(QuotaGate::new(pool.clone()));
        let transport = Arc::new(RoutingTransport::new());
        let gateway = Arc::new(LlmGateway::new(
            Arc::clone(&transport) as Arc<dyn LlmTransport>,
            Pricing { input_cost_per_1k: 0.001, output_cost_per_1k: 0.002 },
        ));

        Self { pool, store, quota, transport, gateway }
    }

    pub fn assembly_pipeline(&self) -> AssemblyPipeline {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder);
        AssemblyPipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&embedder),
            Arc::clone(&self.gateway),
            Arc::new(HybridRetrieval::new(Arc::clone(&self.store), Arc::clone(&embedder))),
            Arc::new(DependencyResolver::new(Arc::clone(&self.store))),
            Arc::new(ArchitecturePlanner::new(
                Arc::clone(&self.store),
                Arc::clone(&self.gateway),
            )),
            Arc::new(FinalSelector::new(Arc::clone(&self.gateway))),
            Arc::new(Categorizer::new(Arc::clone(&self.gateway))),
            Arc::clone(&self.quota),
            1_000,
            Duration::from_secs(10),
        )
    }

    pub fn crash_pipeline(&self, known_registry: Vec<(&'static str, &'static str)>) -> CrashPipeline {
        CrashPipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            Arc::new(FakeRegistry { known: known_registry }),
            Arc::new(DedupCache::new(Duration::from_secs(3600), 64)),
            Arc::clone(&self.quota),
        )
    }

    pub async fn user_counters(&self, user_id: &str) -> (i64, i64, i64) {
        sqlx::query_as(
            "SELECT daily_requests_used, monthly_requests_used, ai_tokens_used \
             FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .expect("user row")
    }
}

pub fn simple_board(slugs: &[&str]) -> BoardState {
    let category_id = Uuid::new_v4();
    BoardState {
        project_id: None,
        camera: Camera::default(),
        categories: vec![BoardCategory {
            id: category_id,
            title: "Mods".into(),
            position: Position { x: 0.0, y: 0.0 },
            color: "#4f8cff".into(),
            width: 340.0,
            height: 200.0,
        }],
        mods: slugs
            .iter()
            .enumerate()
            .map(|(i, slug)| BoardMod {
                source_id: format!("id-{}", slug),
                slug: slug.to_string(),
                title: slug.to_string(),
                icon_url: None,
                description: String::new(),
                unique_id: Uuid::new_v4(),
                position: Position { x: 20.0, y: 60.0 + i as f64 * 60.0 },
                category_id,
                category_index: i as i32,
                is_disabled: false,
                version: None,
                cached_dependencies: vec![],
            })
            .collect(),
        updated_at: Utc::now(),
    }
}

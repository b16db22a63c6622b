use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use packsmith::config::Config;
use packsmith::db;
use packsmith::models;
use packsmith::services::{
    ArchitecturePlanner, AssemblyPipeline, Categorizer, CrashPipeline, DedupCache,
    DependencyResolver, FinalSelector, HttpEmbedder, HttpLlmTransport, HttpModRegistry,
    HybridRetrieval, LlmGateway, ModStore, Pricing, QuotaGate,
};
use packsmith::utils::JwtUtil;
use packsmith::{AppState, handlers, middleware};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::build_board::build_board,
        handlers::auto_sort::auto_sort,
        handlers::crash_doctor::analyze,
        handlers::mod_tags::get_mod_tags,
        handlers::feedback::build_feedback,
        handlers::feedback::sort_feedback,
        handlers::system::health,
    ),
    components(
        schemas(
            models::BoardState,
            models::BoardMod,
            models::BoardCategory,
            models::Camera,
            models::Position,
            models::RepairOperation,
            models::RepairAction,
            models::FixPriority,
            models::CrashErrorKind,
        )
    ),
    tags(
        (name = "Assembly", description = "AI modpack assembly endpoints"),
        (name = "Crash Doctor", description = "Crash log analysis and repair"),
        (name = "Catalog", description = "Public catalog lookups"),
        (name = "Feedback", description = "Build and categorization feedback"),
        (name = "System", description = "Service health"),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(utoipa::openapi::security::Http::new(
                utoipa::openapi::security::HttpAuthScheme::Bearer,
            )),
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("packsmith.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Packsmith starting up");

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database pool created successfully");

    let jwt_util = Arc::new(JwtUtil::new(&config.auth.jwt_secret, &config.auth.jwt_audience));

    let mod_store = Arc::new(ModStore::new(pool.clone()));
    let quota = Arc::new(QuotaGate::new(pool.clone()));

    let embedder = Arc::new(HttpEmbedder::new(
        &config.llm.api_base,
        &config.llm.api_key,
        &config.llm.embeddings_model,
    ));

    let transport = Arc::new(HttpLlmTransport::new(
        &config.llm.api_base,
        &config.llm.api_key,
        &config.llm.model,
        Duration::from_secs(30),
    ));
    let gateway = Arc::new(LlmGateway::new(
        transport,
        Pricing {
            input_cost_per_1k: config.llm.input_cost_per_1k,
            output_cost_per_1k: config.llm.output_cost_per_1k,
        },
    ));
    tracing::info!("LLM gateway initialized (model {})", config.llm.model);

    let registry_client = Arc::new(HttpModRegistry::new(&config.registry.base_url));

    let retrieval = Arc::new(HybridRetrieval::new(Arc::clone(&mod_store), embedder.clone()));
    let resolver = Arc::new(DependencyResolver::new(Arc::clone(&mod_store)));
    let architect =
        Arc::new(ArchitecturePlanner::new(Arc::clone(&mod_store), Arc::clone(&gateway)));
    let selector = Arc::new(FinalSelector::new(Arc::clone(&gateway)));
    let categorizer = Arc::new(Categorizer::new(Arc::clone(&gateway)));

    let assembly_pipeline = Arc::new(AssemblyPipeline::new(
        Arc::clone(&mod_store),
        embedder.clone(),
        Arc::clone(&gateway),
        Arc::clone(&retrieval),
        Arc::clone(&resolver),
        Arc::clone(&architect),
        Arc::clone(&selector),
        Arc::clone(&categorizer),
        Arc::clone(&quota),
        config.pipeline.min_downloads,
        Duration::from_secs(config.pipeline.assembly_budget_secs),
    ));

    let dedup = Arc::new(DedupCache::new(
        Duration::from_secs(config.pipeline.dedup_ttl_secs),
        config.pipeline.dedup_capacity,
    ));
    let crash_pipeline = Arc::new(CrashPipeline::new(
        Arc::clone(&mod_store),
        Arc::clone(&gateway),
        registry_client,
        dedup,
        Arc::clone(&quota),
    ));

    let app_state = Arc::new(AppState {
        db: pool.clone(),
        jwt_util: Arc::clone(&jwt_util),
        mod_store: Arc::clone(&mod_store),
        quota: Arc::clone(&quota),
        categorizer: Arc::clone(&categorizer),
        assembly_pipeline,
        crash_pipeline,
        use_v3_default: config.pipeline.use_v3_default,
        crash_budget_secs: config.pipeline.crash_budget_secs,
    });

    let auth_state = middleware::AuthState { jwt_util: Arc::clone(&jwt_util) };

    let public_routes = Router::new()
        .route("/api/health", get(handlers::system::health))
        .route("/api/get-mod-tags", post(handlers::mod_tags::get_mod_tags))
        .with_state(Arc::clone(&app_state));

    let protected_routes = Router::new()
        .route("/api/ai/build-board", post(handlers::build_board::build_board))
        .route("/api/ai/auto-sort", post(handlers::auto_sort::auto_sort))
        .route("/api/ai/crash-doctor/analyze", post(handlers::crash_doctor::analyze))
        .route("/api/feedback", post(handlers::feedback::build_feedback))
        .route("/api/feedback/categorization", post(handlers::feedback::sort_feedback))
        .layer(axum_middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ))
        .with_state(Arc::clone(&app_state));

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Packsmith listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Packsmith shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("shutdown signal received, draining connections");
}

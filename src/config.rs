use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub llm: LlmConfig,
    pub registry: RegistryConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Store URL; for SQLite this is a `sqlite://` path. Any access
    /// credential travels inside the URL.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
}

/// External language-model and embeddings API (OpenAI-compatible).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub embeddings_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// USD per 1K prompt tokens, used for cost attribution in traces.
    pub input_cost_per_1k: f64,
    /// USD per 1K completion tokens.
    pub output_cost_per_1k: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Mod registry API base (Modrinth-compatible).
    pub base_url: String,
}

/// Orchestration knobs: request budgets, dedup TTL, retrieval thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub assembly_budget_secs: u64,
    pub crash_budget_secs: u64,
    pub dedup_ttl_secs: u64,
    pub dedup_capacity: usize,
    /// Minimum downloads for retrieval candidates.
    pub min_downloads: i64,
    /// Default for requests that do not set `use_v3_architecture`.
    pub use_v3_default: bool,
    /// Fan-out bound for independent calls within one stage.
    pub max_parallel_fetches: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "packsmith")]
#[command(version, about = "Packsmith - AI Modpack Assembly Backend")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Store/database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub store_url: Option<String>,

    /// Logging level (overrides config file, e.g., "info,packsmith=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file
    /// support.
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with_args(&cli_args)
    }

    pub fn load_with_args(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - SERVER_PORT: Listen port
    /// - STORE_URL: Store/database URL
    /// - JWT_SECRET / JWT_AUDIENCE: Bearer-token verification
    /// - LLM_BASE_URL / LLM_API_KEY / LLM_MODEL: Language-model API
    /// - MOD_REGISTRY_BASE_URL: Mod registry API base
    /// - DEDUP_TTL_SECONDS: Crash dedup-cache TTL
    /// - REQUEST_BUDGET_ASSEMBLY_S / REQUEST_BUDGET_CRASH_S: Pipeline budgets
    /// - USE_V3_DEFAULT: Default architecture-planner toggle
    /// - LOG_LEVEL: Logging filter
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(url) = std::env::var("STORE_URL") {
            self.database.url = url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
            tracing::info!("Override auth.jwt_secret from env");
        }

        if let Ok(aud) = std::env::var("JWT_AUDIENCE") {
            self.auth.jwt_audience = aud;
            tracing::info!("Override auth.jwt_audience from env: {}", self.auth.jwt_audience);
        }

        if let Ok(base) = std::env::var("LLM_BASE_URL") {
            self.llm.api_base = base;
            tracing::info!("Override llm.api_base from env");
        }

        if let Ok(key) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = key;
            tracing::info!("Override llm.api_key from env");
        }

        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
            tracing::info!("Override llm.model from env: {}", self.llm.model);
        }

        if let Ok(base) = std::env::var("MOD_REGISTRY_BASE_URL") {
            self.registry.base_url = base;
            tracing::info!("Override registry.base_url from env");
        }

        if let Ok(ttl) = std::env::var("DEDUP_TTL_SECONDS")
            && let Ok(ttl) = ttl.parse()
        {
            self.pipeline.dedup_ttl_secs = ttl;
            tracing::info!("Override pipeline.dedup_ttl_secs from env: {}", ttl);
        }

        if let Ok(budget) = std::env::var("REQUEST_BUDGET_ASSEMBLY_S")
            && let Ok(budget) = budget.parse()
        {
            self.pipeline.assembly_budget_secs = budget;
            tracing::info!("Override pipeline.assembly_budget_secs from env: {}", budget);
        }

        if let Ok(budget) = std::env::var("REQUEST_BUDGET_CRASH_S")
            && let Ok(budget) = budget.parse()
        {
            self.pipeline.crash_budget_secs = budget;
            tracing::info!("Override pipeline.crash_budget_secs from env: {}", budget);
        }

        if let Ok(v3) = std::env::var("USE_V3_DEFAULT")
            && let Ok(v3) = v3.parse()
        {
            self.pipeline.use_v3_default = v3;
            tracing::info!("Override pipeline.use_v3_default from env: {}", v3);
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(url) = &args.store_url {
            self.database.url = url.clone();
            tracing::info!("Override database.url from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }
    }

    /// Validate configuration. Required values that are still unset after
    /// all override layers fail startup here.
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("STORE_URL (database.url) is required");
        }

        if self.auth.jwt_secret.is_empty() {
            anyhow::bail!("JWT_SECRET (auth.jwt_secret) is required");
        }

        if self.llm.api_key.is_empty() {
            anyhow::bail!("LLM_API_KEY (llm.api_key) is required");
        }

        if self.llm.api_base.is_empty() {
            anyhow::bail!("LLM_BASE_URL (llm.api_base) is required");
        }

        if self.registry.base_url.is_empty() {
            anyhow::bail!("MOD_REGISTRY_BASE_URL (registry.base_url) is required");
        }

        if self.pipeline.assembly_budget_secs == 0 || self.pipeline.crash_budget_secs == 0 {
            anyhow::bail!("pipeline request budgets must be > 0");
        }

        if self.pipeline.max_parallel_fetches == 0 {
            anyhow::bail!("pipeline.max_parallel_fetches must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/packsmith.db".to_string() }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwt_secret: String::new(), jwt_audience: "packsmith".to_string() }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            embeddings_model: "text-embedding-3-small".to_string(),
            max_tokens: 4096,
            temperature: 0.3,
            input_cost_per_1k: 0.00015,
            output_cost_per_1k: 0.0006,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { base_url: "https://api.modrinth.com/v2".to_string() }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            assembly_budget_secs: 180,
            crash_budget_secs: 120,
            dedup_ttl_secs: 3600,
            dedup_capacity: 1024,
            min_downloads: 5_000,
            use_v3_default: true,
            max_parallel_fetches: 8,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,packsmith=debug".to_string(),
            file: Some("logs/packsmith.log".to_string()),
        }
    }
}

//! Packsmith Library
//!
//! This library contains all the core modules for the Packsmith assembly
//! backend: the conditional assembly pipeline, the crash-analysis pipeline,
//! and their shared collaborators (hybrid retrieval, dependency resolution,
//! quota gating, progress streaming).

use std::sync::Arc;

use sqlx::SqlitePool;

pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::{
    ArchitecturePlanner, AssemblyPipeline, Categorizer, CrashPipeline, DedupCache,
    DependencyResolver, FinalSelector, HybridRetrieval, LlmGateway, ModStore, QuotaGate,
};
pub use utils::JwtUtil;

/// Application shared state
///
/// Rust's type system is the DI container: every service is constructed at
/// startup, wrapped in Arc and cloned into the router state.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub jwt_util: Arc<JwtUtil>,

    pub mod_store: Arc<ModStore>,
    pub quota: Arc<QuotaGate>,
    pub categorizer: Arc<Categorizer>,

    pub assembly_pipeline: Arc<AssemblyPipeline>,
    pub crash_pipeline: Arc<CrashPipeline>,

    pub use_v3_default: bool,
    pub crash_budget_secs: u64,
}

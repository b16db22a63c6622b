//! Reference modpack models, mined read-only by the architecture planner.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::{HashMap, HashSet};

use super::mods::decode_embedding;

/// Category inside a reference pack's curated architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackCategory {
    pub name: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub preferred_capabilities: Vec<String>,
    /// capability -> mods known to provide it in this pack.
    #[serde(default)]
    pub providers: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackArchitecture {
    #[serde(default)]
    pub categories: Vec<PackCategory>,
}

/// Parsed reference modpack.
#[derive(Debug, Clone)]
pub struct RefModpack {
    pub source_id: String,
    pub title: String,
    pub description: String,
    pub mc_versions: HashSet<String>,
    pub loaders: HashSet<String>,
    pub architecture: PackArchitecture,
    pub downloads: i64,
    pub followers: i64,
    pub embedding: Option<Vec<f32>>,
}

impl RefModpack {
    /// Every mod id referenced anywhere in the pack's architecture.
    pub fn all_mod_ids(&self) -> HashSet<&str> {
        self.architecture
            .categories
            .iter()
            .flat_map(|c| c.providers.values())
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ModpackRow {
    pub source_id: String,
    pub title: String,
    pub description: String,
    pub mc_versions: String,
    pub loaders: String,
    pub architecture: String,
    pub downloads: i64,
    pub followers: i64,
    pub embedding: Option<Vec<u8>>,
}

impl TryFrom<ModpackRow> for RefModpack {
    type Error = serde_json::Error;

    fn try_from(row: ModpackRow) -> Result<Self, Self::Error> {
        Ok(Self {
            source_id: row.source_id,
            title: row.title,
            description: row.description,
            mc_versions: serde_json::from_str(&row.mc_versions)?,
            loaders: serde_json::from_str(&row.loaders)?,
            architecture: serde_json::from_str(&row.architecture)?,
            downloads: row.downloads,
            followers: row.followers,
            embedding: row.embedding.as_deref().map(decode_embedding),
        })
    }
}

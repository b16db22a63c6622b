//! Mod catalog models.
//!
//! Mods are ingested by an external crawler; this service only reads them.
//! Set-valued columns are stored as JSON text and the embedding as a
//! little-endian f32 blob, so the row type is parsed into [`ModEntry`]
//! before anything downstream touches it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::{HashMap, HashSet};

/// Loader value that makes a mod usable everywhere.
pub const UNIVERSAL_LOADER: &str = "universal";

/// Capability paths look like `combat.weapons.melee`.
static CAPABILITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(\.[a-z0-9_]+)*$").expect("valid capability regex"));

pub fn is_valid_capability(s: &str) -> bool {
    CAPABILITY_RE.is_match(s)
}

// ============================================================================
// Dependencies
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    Required,
    Optional,
    Embedded,
    Incompatible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModDependency {
    pub project_id: String,
    pub dependency_type: DependencyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_range: Option<String>,
}

// ============================================================================
// Mod entry
// ============================================================================

/// Parsed catalog entry for a single mod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModEntry {
    pub source_id: String,
    pub slug: String,
    pub name: String,
    pub summary: String,
    pub description: String,
    pub icon_url: Option<String>,
    pub loaders: HashSet<String>,
    pub game_versions: HashSet<String>,
    pub capabilities: HashSet<String>,
    pub modrinth_categories: HashSet<String>,
    pub tags: Vec<String>,
    pub dependencies: Vec<ModDependency>,
    /// Per-loader list of source ids this mod cannot run alongside.
    pub incompatibilities: HashMap<String, Vec<String>>,
    pub downloads: i64,
    pub followers: i64,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl ModEntry {
    /// A mod is usable under loader `l` iff `l ∈ loaders ∪ {universal}`.
    pub fn supports_loader(&self, loader: &str) -> bool {
        self.loaders.contains(loader) || self.loaders.contains(UNIVERSAL_LOADER)
    }

    pub fn supports_game_version(&self, version: &str) -> bool {
        self.game_versions.contains(version)
    }

    pub fn required_dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| d.dependency_type == DependencyType::Required)
            .map(|d| d.project_id.as_str())
    }

    /// Incompatible source ids relevant for `loader`, including the
    /// loader-independent `universal` entries.
    pub fn incompatible_ids(&self, loader: &str) -> impl Iterator<Item = &str> {
        self.incompatibilities
            .get(loader)
            .into_iter()
            .chain(self.incompatibilities.get(UNIVERSAL_LOADER))
            .flatten()
            .map(String::as_str)
    }

    pub fn has_any_capability(&self, wanted: &[String]) -> bool {
        wanted.iter().any(|c| self.capabilities.contains(c))
    }

    /// True when the mod is a library/API rather than player-facing content.
    pub fn is_library(&self) -> bool {
        self.capabilities.contains("dependency.library") || self.capabilities.contains("api.exposed")
    }
}

// ============================================================================
// Raw row + parsing
// ============================================================================

/// Raw `mods` row as stored; JSON columns are parsed into [`ModEntry`].
#[derive(Debug, Clone, FromRow)]
pub struct ModRow {
    pub source_id: String,
    pub slug: String,
    pub name: String,
    pub summary: String,
    pub description: String,
    pub icon_url: Option<String>,
    pub loaders: String,
    pub game_versions: String,
    pub capabilities: String,
    pub modrinth_categories: String,
    pub tags: String,
    pub dependencies: String,
    pub incompatibilities: String,
    pub downloads: i64,
    pub followers: i64,
    pub embedding: Option<Vec<u8>>,
}

impl TryFrom<ModRow> for ModEntry {
    type Error = serde_json::Error;

    fn try_from(row: ModRow) -> Result<Self, Self::Error> {
        Ok(Self {
            source_id: row.source_id,
            slug: row.slug,
            name: row.name,
            summary: row.summary,
            description: row.description,
            icon_url: row.icon_url,
            loaders: serde_json::from_str(&row.loaders)?,
            game_versions: serde_json::from_str(&row.game_versions)?,
            capabilities: serde_json::from_str(&row.capabilities)?,
            modrinth_categories: serde_json::from_str(&row.modrinth_categories)?,
            tags: serde_json::from_str(&row.tags)?,
            dependencies: serde_json::from_str(&row.dependencies)?,
            incompatibilities: serde_json::from_str(&row.incompatibilities)?,
            downloads: row.downloads,
            followers: row.followers,
            embedding: row.embedding.as_deref().map(decode_embedding),
        })
    }
}

/// Embeddings are stored as little-endian f32 blobs.
pub fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

// ============================================================================
// Search filters
// ============================================================================

/// Filters applied by the store on catalog searches.
#[derive(Debug, Clone, Default)]
pub struct ModFilters {
    pub loader: Option<String>,
    pub game_version: Option<String>,
    pub min_downloads: Option<i64>,
    /// Any-match capability filter.
    pub capabilities: Option<Vec<String>>,
}

impl ModFilters {
    pub fn for_target(loader: &str, game_version: &str) -> Self {
        Self {
            loader: Some(loader.to_string()),
            game_version: Some(game_version.to_string()),
            ..Self::default()
        }
    }

    pub fn with_min_downloads(mut self, min: i64) -> Self {
        self.min_downloads = Some(min);
        self
    }

    pub fn with_capabilities(mut self, caps: Vec<String>) -> Self {
        if !caps.is_empty() {
            self.capabilities = Some(caps);
        }
        self
    }

    pub fn matches(&self, entry: &ModEntry) -> bool {
        if let Some(loader) = &self.loader
            && !entry.supports_loader(loader)
        {
            return false;
        }
        if let Some(version) = &self.game_version
            && !entry.supports_game_version(version)
        {
            return false;
        }
        if let Some(min) = self.min_downloads
            && entry.downloads < min
        {
            return false;
        }
        if let Some(caps) = &self.capabilities
            && !entry.has_any_capability(caps)
        {
            return false;
        }
        true
    }
}

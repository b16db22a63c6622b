//! Board state: the serializable authoring canvas for a modpack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Camera {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BoardMod {
    pub source_id: String,
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub description: String,
    pub unique_id: Uuid,
    pub position: Position,
    pub category_id: Uuid,
    pub category_index: i32,
    #[serde(default)]
    pub is_disabled: bool,
    /// Version label, bumped by crash-repair `update_mod` operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Resolved required-dependency ids that are present on the same board.
    #[serde(default)]
    pub cached_dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BoardCategory {
    pub id: Uuid,
    pub title: String,
    pub position: Position,
    pub color: String,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BoardState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub camera: Camera,
    #[serde(default)]
    pub mods: Vec<BoardMod>,
    #[serde(default)]
    pub categories: Vec<BoardCategory>,
    pub updated_at: DateTime<Utc>,
}

impl BoardState {
    /// Mod names/slugs as they would appear in a launcher log, for overlap
    /// checks against crash logs.
    pub fn mod_idents(&self) -> Vec<String> {
        self.mods
            .iter()
            .flat_map(|m| [m.slug.to_lowercase(), m.title.to_lowercase()])
            .collect()
    }

    /// Every `category_id` must reference an existing category.
    pub fn is_referentially_consistent(&self) -> bool {
        let ids: std::collections::HashSet<Uuid> =
            self.categories.iter().map(|c| c.id).collect();
        self.mods.iter().all(|m| ids.contains(&m.category_id))
    }
}

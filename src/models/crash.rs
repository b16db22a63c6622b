//! Crash-analysis models: diagnosed error kinds, repair operations and the
//! persisted session record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::board::BoardState;

/// Diagnosed failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CrashErrorKind {
    ModConflict,
    MissingDependency,
    OutdatedMod,
    MixinError,
    ClassNotFound,
    FabricOnForge,
    Memory,
    Unknown,
}

impl CrashErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModConflict => "mod_conflict",
            Self::MissingDependency => "missing_dependency",
            Self::OutdatedMod => "outdated_mod",
            Self::MixinError => "mixin_error",
            Self::ClassNotFound => "class_not_found",
            Self::FabricOnForge => "fabric_on_forge",
            Self::Memory => "memory",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FixPriority {
    Critical,
    High,
    Normal,
    Low,
}

/// What a repair does. `add_mod` is intent-only: the board patcher never
/// downloads anything, the launcher acts on the suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
    RemoveMod {
        target: String,
    },
    DisableMod {
        target: String,
    },
    UpdateMod {
        target: String,
        to_version: String,
    },
    AddMod {
        target: String,
        source_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    ClearLoaderCache,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RepairOperation {
    #[serde(flatten)]
    pub action: RepairAction,
    pub reason: String,
    pub priority: FixPriority,
}

impl RepairOperation {
    /// The board mod this operation targets, if any.
    pub fn target(&self) -> Option<&str> {
        match &self.action {
            RepairAction::RemoveMod { target }
            | RepairAction::DisableMod { target }
            | RepairAction::UpdateMod { target, .. }
            | RepairAction::AddMod { target, .. } => Some(target),
            RepairAction::ClearLoaderCache => None,
        }
    }
}

/// Append-only record of one crash analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashSession {
    pub id: String,
    pub user_id: String,
    pub crash_log_sanitized: String,
    pub board_state_snapshot: BoardState,
    pub root_cause: String,
    pub error_kind: CrashErrorKind,
    pub confidence: f64,
    pub suggestions: Vec<RepairOperation>,
    pub warnings: Vec<String>,
    pub patched_board_state: BoardState,
    pub token_usage: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_operation_wire_shape() {
        let op = RepairOperation {
            action: RepairAction::UpdateMod {
                target: "sodium".into(),
                to_version: "0.6.1".into(),
            },
            reason: "known mixin fix".into(),
            priority: FixPriority::High,
        };
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["action"], "update_mod");
        assert_eq!(v["target"], "sodium");
        assert_eq!(v["to_version"], "0.6.1");
        assert_eq!(v["priority"], "high");

        let back: RepairOperation = serde_json::from_value(v).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn clear_cache_has_no_target() {
        let op = RepairOperation {
            action: RepairAction::ClearLoaderCache,
            reason: "stale loader metadata".into(),
            priority: FixPriority::Low,
        };
        assert!(op.target().is_none());
    }
}

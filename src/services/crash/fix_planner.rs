//! Fix planner: promote model-suggested fixes into validated repair
//! operations.
//!
//! Every suggestion is checked against the board and the external mod
//! registry before it becomes an operation. A suggestion that cannot be
//! validated (unknown mod, no compatible version, registry down) turns into
//! a warning and never blocks the rest of the plan.

use std::sync::Arc;

use crate::models::board::BoardState;
use crate::models::crash::{FixPriority, RepairAction, RepairOperation};
use crate::services::llm::scenarios::crash_analysis::SuggestedFix;
use crate::services::registry::{ModRegistry, RegistryError};

pub struct PlannedFixes {
    pub operations: Vec<RepairOperation>,
    pub warnings: Vec<String>,
}

fn normalize_ident(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn board_has(board: &BoardState, target: &str) -> bool {
    let wanted = normalize_ident(target);
    board
        .mods
        .iter()
        .any(|m| normalize_ident(&m.slug) == wanted || normalize_ident(&m.title) == wanted)
}

/// Validate all suggestions concurrently (registry lookups dominate) and
/// keep the original ordering in the output.
pub async fn plan_fixes(
    suggestions: Vec<SuggestedFix>,
    board: &BoardState,
    registry: Arc<dyn ModRegistry>,
    loader: &str,
    mc_version: &str,
) -> PlannedFixes {
    let mut handles = Vec::with_capacity(suggestions.len());

    for fix in suggestions {
        let registry = Arc::clone(&registry);
        let board = board.clone();
        let loader = loader.to_string();
        let mc_version = mc_version.to_string();
        handles.push(tokio::spawn(async move {
            validate_fix(fix, &board, registry.as_ref(), &loader, &mc_version).await
        }));
    }

    let mut planned = PlannedFixes { operations: Vec::new(), warnings: Vec::new() };
    for handle in handles {
        match handle.await {
            Ok(Ok(op)) => planned.operations.push(op),
            Ok(Err(warning)) => planned.warnings.push(warning),
            Err(e) => planned.warnings.push(format!("fix validation task failed: {}", e)),
        }
    }

    planned
        .operations
        .sort_by(|a, b| a.priority.cmp(&b.priority));
    planned
}

async fn validate_fix(
    fix: SuggestedFix,
    board: &BoardState,
    registry: &dyn ModRegistry,
    loader: &str,
    mc_version: &str,
) -> Result<RepairOperation, String> {
    let priority = fix.priority;
    let reason = fix.reason.clone();
    let target = fix.target_mod.trim().to_string();

    let action = match fix.action.as_str() {
        "remove_mod" => {
            require_on_board(board, &target, "remove")?;
            RepairAction::RemoveMod { target }
        },
        "disable_mod" => {
            require_on_board(board, &target, "disable")?;
            RepairAction::DisableMod { target }
        },
        "update_mod" => {
            require_on_board(board, &target, "update")?;
            let version = lookup_version(registry, &target, loader, mc_version).await?;
            let to_version = match version {
                Some(v) => v,
                None => fix.to_version.ok_or_else(|| {
                    format!("no {} build of {} for {}", loader, target, mc_version)
                })?,
            };
            RepairAction::UpdateMod { target, to_version }
        },
        "add_mod" => {
            let ident = fix.source_id.clone().unwrap_or_else(|| target.clone());
            let project = registry
                .get_project(&ident)
                .await
                .map_err(|e| registry_warning(&target, &e))?
                .ok_or_else(|| format!("{} does not exist in the mod registry", ident))?;

            let version = lookup_version(registry, &project.id, loader, mc_version).await?;
            if version.is_none() {
                return Err(format!(
                    "{} has no {} build for {}",
                    project.slug, loader, mc_version
                ));
            }
            RepairAction::AddMod { target, source_id: project.id, version }
        },
        "clear_loader_cache" => RepairAction::ClearLoaderCache,
        other => return Err(format!("unsupported fix action '{}'", other)),
    };

    Ok(RepairOperation { action, reason, priority })
}

fn require_on_board(board: &BoardState, target: &str, verb: &str) -> Result<(), String> {
    if target.is_empty() {
        return Err(format!("cannot {} a fix without a target mod", verb));
    }
    if !board_has(board, target) {
        return Err(format!("cannot {} {}: not on the board", verb, target));
    }
    Ok(())
}

async fn lookup_version(
    registry: &dyn ModRegistry,
    ident: &str,
    loader: &str,
    mc_version: &str,
) -> Result<Option<String>, String> {
    match registry.compatible_version(ident, loader, mc_version).await {
        Ok(version) => Ok(version.map(|v| v.version_number)),
        Err(e) => Err(registry_warning(ident, &e)),
    }
}

fn registry_warning(ident: &str, e: &RegistryError) -> String {
    format!("could not validate {}: {}", ident, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry::{RegistryProject, RegistryVersion};
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    struct FakeRegistry {
        known: Vec<(&'static str, &'static str)>,
        has_version: bool,
        unavailable: bool,
    }

    #[async_trait]
    impl ModRegistry for FakeRegistry {
        async fn get_project(
            &self,
            id_or_slug: &str,
        ) -> Result<Option<RegistryProject>, RegistryError> {
            if self.unavailable {
                return Err(RegistryError::Unavailable("503".into()));
            }
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
            _id_or_slug: &str,
            loader: &str,
            game_version: &str,
        ) -> Result<Option<RegistryVersion>, RegistryError> {
            if self.unavailable {
                return Err(RegistryError::Unavailable("503".into()));
            }
            Ok(self.has_version.then(|| RegistryVersion {
                id: "v1".into(),
                version_number: "2.0.0".into(),
                game_versions: vec![game_version.to_string()],
                loaders: vec![loader.to_string()],
            }))
        }
    }

    fn board_with(slugs: &[&str]) -> BoardState {
        let category_id = Uuid::new_v4();
        BoardState {
            project_id: None,
            camera: Default::default(),
            categories: vec![crate::models::board::BoardCategory {
                id: category_id,
                title: "Mods".into(),
                position: crate::models::board::Position { x: 0.0, y: 0.0 },
                color: "#fff".into(),
                width: 340.0,
                height: 100.0,
            }],
            mods: slugs
                .iter()
                .enumerate()
                .map(|(i, slug)| crate::models::board::BoardMod {
                    source_id: format!("id-{}", slug),
                    slug: slug.to_string(),
                    title: slug.to_string(),
                    icon_url: None,
                    description: String::new(),
                    unique_id: Uuid::new_v4(),
                    position: crate::models::board::Position { x: 0.0, y: 0.0 },
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

    fn fix(action: &str, target: &str, source_id: Option<&str>) -> SuggestedFix {
        SuggestedFix {
            action: action.to_string(),
            target_mod: target.to_string(),
            to_version: None,
            source_id: source_id.map(str::to_string),
            reason: "test".into(),
            priority: FixPriority::High,
        }
    }

    #[tokio::test]
    async fn add_mod_validates_against_registry() {
        let registry = Arc::new(FakeRegistry {
            known: vec![("P7dR8mSH", "fabric-api")],
            has_version: true,
            unavailable: false,
        });
        let board = board_with(&["sodium"]);

        let planned = plan_fixes(
            vec![fix("add_mod", "fabric-api", Some("fabric-api"))],
            &board,
            registry,
            "fabric",
            "1.21.1",
        )
        .await;

        assert!(planned.warnings.is_empty());
        assert_eq!(planned.operations.len(), 1);
        match &planned.operations[0].action {
            RepairAction::AddMod { source_id, version, .. } => {
                assert_eq!(source_id, "P7dR8mSH");
                assert_eq!(version.as_deref(), Some("2.0.0"));
            },
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_mod_becomes_warning_not_operation() {
        let registry =
            Arc::new(FakeRegistry { known: vec![], has_version: true, unavailable: false });
        let board = board_with(&["sodium"]);

        let planned = plan_fixes(
            vec![fix("add_mod", "made-up-mod", None)],
            &board,
            registry,
            "fabric",
            "1.21.1",
        )
        .await;

        assert!(planned.operations.is_empty());
        assert_eq!(planned.warnings.len(), 1);
        assert!(planned.warnings[0].contains("made-up-mod"));
    }

    #[tokio::test]
    async fn registry_outage_degrades_to_warning() {
        let registry =
            Arc::new(FakeRegistry { known: vec![], has_version: false, unavailable: true });
        let board = board_with(&["sodium"]);

        let planned = plan_fixes(
            vec![
                fix("add_mod", "fabric-api", None),
                fix("disable_mod", "sodium", None),
            ],
            &board,
            registry,
            "fabric",
            "1.21.1",
        )
        .await;

        // the board-local fix still goes through
        assert_eq!(planned.operations.len(), 1);
        assert!(matches!(planned.operations[0].action, RepairAction::DisableMod { .. }));
        assert_eq!(planned.warnings.len(), 1);
    }

    #[tokio::test]
    async fn remove_requires_presence_on_board() {
        let registry =
            Arc::new(FakeRegistry { known: vec![], has_version: true, unavailable: false });
        let board = board_with(&["sodium"]);

        let planned = plan_fixes(
            vec![fix("remove_mod", "lithium", None), fix("remove_mod", "sodium", None)],
            &board,
            registry,
            "fabric",
            "1.21.1",
        )
        .await;

        assert_eq!(planned.operations.len(), 1);
        assert_eq!(planned.warnings.len(), 1);
    }

    #[tokio::test]
    async fn operations_sorted_by_priority() {
        let registry =
            Arc::new(FakeRegistry { known: vec![], has_version: true, unavailable: false });
        let board = board_with(&["a", "b"]);

        let mut low = fix("disable_mod", "a", None);
        low.priority = FixPriority::Low;
        let mut critical = fix("remove_mod", "b", None);
        critical.priority = FixPriority::Critical;

        let planned =
            plan_fixes(vec![low, critical], &board, registry, "fabric", "1.21.1").await;
        assert_eq!(planned.operations[0].priority, FixPriority::Critical);
    }
}

//! Board patcher: apply repair operations to a deep copy of the board.
//!
//! Only `remove_mod`, `disable_mod` and `update_mod` mutate the copy.
//! `add_mod` is intent-only (the launcher performs the download) and
//! `clear_loader_cache` has no board representation.

use chrono::Utc;

use crate::models::board::BoardState;
use crate::models::crash::{RepairAction, RepairOperation};

fn normalize_ident(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

pub fn apply_operations(board: &BoardState, operations: &[RepairOperation]) -> BoardState {
    let mut patched = board.clone();

    for op in operations {
        match &op.action {
            RepairAction::RemoveMod { target } => {
                let wanted = normalize_ident(target);
                patched.mods.retain(|m| {
                    normalize_ident(&m.slug) != wanted && normalize_ident(&m.title) != wanted
                });
            },
            RepairAction::DisableMod { target } => {
                let wanted = normalize_ident(target);
                for m in &mut patched.mods {
                    if normalize_ident(&m.slug) == wanted || normalize_ident(&m.title) == wanted {
                        m.is_disabled = true;
                    }
                }
            },
            RepairAction::UpdateMod { target, to_version } => {
                let wanted = normalize_ident(target);
                for m in &mut patched.mods {
                    if normalize_ident(&m.slug) == wanted || normalize_ident(&m.title) == wanted {
                        m.version = Some(to_version.clone());
                    }
                }
            },
            RepairAction::AddMod { .. } | RepairAction::ClearLoaderCache => {},
        }
    }

    patched.updated_at = Utc::now();
    patched
}

//! Deterministic board layout.
//!
//! Categories flow left-to-right across a fixed number of columns with a
//! fixed column width; each column stacks its categories with a pitch
//! derived from the category's mod count. Mods are placed row-major inside
//! their category at a fixed vertical cell pitch. Everything except the
//! freshly generated UUIDs is a pure function of the input.

use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::board::{BoardCategory, BoardMod, BoardState, Camera, Position};
use crate::models::mods::ModEntry;

const CATEGORY_WIDTH: f64 = 340.0;
const COLUMN_GAP: f64 = 40.0;
const ROW_GAP: f64 = 40.0;
const COLUMNS: usize = 4;

/// Vertical pitch of one mod cell.
const CELL_PITCH: f64 = 60.0;
/// Category header block above the first cell.
const HEADER_HEIGHT: f64 = 60.0;
const PADDING_BOTTOM: f64 = 20.0;
const MOD_INSET_X: f64 = 20.0;

const CATEGORY_COLORS: [&str; 8] =
    ["#4f8cff", "#ff9f43", "#2ecc71", "#b66cff", "#ff6b81", "#ffd166", "#48dbfb", "#a0a6b1"];

/// One category worth of mods, in final display order.
pub struct BoardGroup {
    pub title: String,
    pub mods: Vec<ModEntry>,
}

pub fn assemble(project_id: Option<String>, groups: &[BoardGroup]) -> BoardState {
    assemble_with_ids(project_id, groups, &mut Uuid::new_v4)
}

/// Layout with an injectable id source; identical input and ids yield an
/// identical board.
pub fn assemble_with_ids(
    project_id: Option<String>,
    groups: &[BoardGroup],
    id_gen: &mut dyn FnMut() -> Uuid,
) -> BoardState {
    let on_board: std::collections::HashSet<&str> = groups
        .iter()
        .flat_map(|g| g.mods.iter().map(|m| m.source_id.as_str()))
        .collect();

    let mut categories = Vec::with_capacity(groups.len());
    let mut board_mods = Vec::new();
    let mut column_cursors = [0.0_f64; COLUMNS];

    for (group_idx, group) in groups.iter().enumerate() {
        let column = group_idx % COLUMNS;
        let x = column as f64 * (CATEGORY_WIDTH + COLUMN_GAP);
        let y = column_cursors[column];
        let height =
            HEADER_HEIGHT + group.mods.len() as f64 * CELL_PITCH + PADDING_BOTTOM;
        column_cursors[column] = y + height + ROW_GAP;

        let category = BoardCategory {
            id: id_gen(),
            title: group.title.clone(),
            position: Position { x, y },
            color: CATEGORY_COLORS[group_idx % CATEGORY_COLORS.len()].to_string(),
            width: CATEGORY_WIDTH,
            height,
        };

        for (mod_idx, entry) in group.mods.iter().enumerate() {
            let cached_dependencies: Vec<String> = entry
                .required_dependency_ids()
                .filter(|id| on_board.contains(id))
                .map(str::to_string)
                .collect();

            board_mods.push(BoardMod {
                source_id: entry.source_id.clone(),
                slug: entry.slug.clone(),
                title: entry.name.clone(),
                icon_url: entry.icon_url.clone(),
                description: entry.summary.clone(),
                unique_id: id_gen(),
                position: Position {
                    x: x + MOD_INSET_X,
                    y: y + HEADER_HEIGHT + mod_idx as f64 * CELL_PITCH,
                },
                category_id: category.id,
                category_index: mod_idx as i32,
                is_disabled: false,
                version: None,
                cached_dependencies,
            });
        }

        categories.push(category);
    }

    BoardState {
        project_id,
        camera: Camera::default(),
        mods: board_mods,
        categories,
        updated_at: Utc::now(),
    }
}

/// Group board mods by category id, preserving category order. Used by the
/// crash pipeline to rebuild groups from an existing board.
pub fn groups_of(board: &BoardState) -> Vec<(Uuid, Vec<&BoardMod>)> {
    let mut by_category: HashMap<Uuid, Vec<&BoardMod>> = HashMap::new();
    for m in &board.mods {
        by_category.entry(m.category_id).or_default().push(m);
    }
    board
        .categories
        .iter()
        .filter_map(|c| {
            by_category.remove(&c.id).map(|mut mods| {
                mods.sort_by_key(|m| m.category_index);
                (c.id, mods)
            })
        })
        .collect()
}

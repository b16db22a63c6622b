//! Freshness check: does the submitted crash log actually describe the
//! current board?

use crate::models::board::BoardState;

/// Overlap below this ratio flags the log as stale.
pub const STALE_THRESHOLD: f64 = 0.3;

/// Warning token attached to the response for stale logs.
pub const STALE_LOG_WARNING: &str = "stale_log";

fn normalize_ident(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Share of log-mentioned mods that are present on the board. An empty log
/// mod list yields 1.0; there is nothing to contradict.
pub fn overlap_ratio(mods_in_log: &[String], board: &BoardState) -> f64 {
    if mods_in_log.is_empty() {
        return 1.0;
    }

    let board_idents: std::collections::HashSet<String> =
        board.mod_idents().iter().map(|s| normalize_ident(s)).collect();

    let matched = mods_in_log
        .iter()
        .filter(|m| board_idents.contains(&normalize_ident(m)))
        .count();

    matched as f64 / mods_in_log.len() as f64
}

pub fn is_stale(mods_in_log: &[String], board: &BoardState) -> bool {
    overlap_ratio(mods_in_log, board) < STALE_THRESHOLD
}

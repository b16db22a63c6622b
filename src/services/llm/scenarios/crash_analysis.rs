//! Crash-diagnosis scenario.
//!
//! Receives a sanitized crash report plus the current board and produces a
//! structured diagnosis with suggested fixes. Suggested fixes are validated
//! against the mod registry by the fix planner before anything is applied.

use serde::{Deserialize, Serialize};

use crate::models::crash::{CrashErrorKind, FixPriority};
use crate::services::llm::gateway::LlmScenario;

const PROMPT_BASE: &str = r#"You are a Minecraft crash analyst for modded installations.
You receive a sanitized crash log (paths, IPs, UUIDs and timestamps removed),
the detected loader and game version, the mods mentioned in the log, and the
mods currently on the user's board.

Diagnose the failure:
- error_kind is one of: mod_conflict, missing_dependency, outdated_mod,
  mixin_error, class_not_found, fabric_on_forge, memory, unknown.
- root_cause is 1-3 sentences naming the failing mod(s) and the mechanism.
- problematic_mods lists each implicated mod with its role in the failure.
- confidence is between 0 and 1. Be conservative: only exceed 0.8 when the
  log names the culprit explicitly.

Suggest fixes:
- Allowed actions: remove_mod, disable_mod, update_mod, add_mod,
  clear_loader_cache.
- target_mod is the mod's name or slug as it appears on the board or in the
  log; for add_mod also give the registry source_id when you know it.
- Prefer the least destructive fix that resolves the crash; order fixes by
  priority: critical, high, normal, low.
- Never invent mods. Only reference mods from the log, the board, or
  well-known dependencies (e.g. fabric-api, cloth-config).

Respond with ONLY a JSON object:
{
  "root_cause": str,
  "error_kind": str,
  "problematic_mods": [{"name": str, "reason": str}],
  "confidence": float,
  "suggested_fixes": [{
    "action": str,
    "target_mod": str,
    "to_version": str | null,
    "source_id": str | null,
    "reason": str,
    "priority": "critical" | "high" | "normal" | "low"
  }]
}"#;

#[derive(Debug, Clone, Serialize)]
pub struct CrashAnalysisScenario {
    pub mc_version: String,
    pub mod_loader: String,
    pub crash_excerpt: String,
    pub stack_trace: String,
    pub mods_in_log: Vec<String>,
    pub board_mods: Vec<String>,
    /// Hint from the sanitizer's own pattern scan, if any.
    pub detected_error_kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProblematicMod {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestedFix {
    pub action: String,
    #[serde(default)]
    pub target_mod: String,
    #[serde(default)]
    pub to_version: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    pub reason: String,
    pub priority: FixPriority,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrashAnalysisResponse {
    pub root_cause: String,
    pub error_kind: CrashErrorKind,
    #[serde(default)]
    pub problematic_mods: Vec<ProblematicMod>,
    pub confidence: f64,
    #[serde(default)]
    pub suggested_fixes: Vec<SuggestedFix>,
}

impl LlmScenario for CrashAnalysisScenario {
    type Response = CrashAnalysisResponse;

    fn name(&self) -> &'static str {
        "crash_analysis"
    }

    fn system_prompt(&self) -> String {
        PROMPT_BASE.to_string()
    }

    fn temperature(&self) -> f64 {
        0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_response_parses() {
        let raw = r#"{
            "root_cause": "Sodium requires Fabric API, which is not installed.",
            "error_kind": "missing_dependency",
            "problematic_mods": [{"name": "sodium", "reason": "unsatisfied dependency"}],
            "confidence": 0.9,
            "suggested_fixes": [{
                "action": "add_mod",
                "target_mod": "fabric-api",
                "to_version": null,
                "source_id": "P7dR8mSH",
                "reason": "required by sodium",
                "priority": "critical"
            }]
        }"#;
        let resp: CrashAnalysisResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.error_kind, CrashErrorKind::MissingDependency);
        assert_eq!(resp.suggested_fixes[0].priority, FixPriority::Critical);
        assert_eq!(resp.suggested_fixes[0].source_id.as_deref(), Some("P7dR8mSH"));
    }
}

//! Crash-log sanitizer.
//!
//! Strips user-identifying material (home paths, IPs, UUIDs, timestamps),
//! extracts the structured facts the analyzer needs (game version, loader,
//! error-kind hint, stack trace, mod list), and truncates oversized logs
//! while keeping the head and the neighborhood of the first error.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::crash::CrashErrorKind;

/// Character budget for the sanitized log.
pub const MAX_LOG_CHARS: usize = 20_000;
/// Share of the budget kept from the head when truncating.
const HEAD_CHARS: usize = 8_000;
const STACK_TRACE_MAX_LINES: usize = 60;

static WINDOWS_HOME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[a-z]:\\Users\\[^\\\s/]+").expect("valid regex"));
static UNIX_HOME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:/home|/Users)/[^/\s]+").expect("valid regex"));
static IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("valid regex"));
static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("valid regex")
});
static CLOCK_TS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d{2}:\d{2}:\d{2}(?:\.\d+)?\]").expect("valid regex"));
static ISO_TS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?").expect("valid regex")
});

static MC_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)minecraft(?:\s+version)?:?\s+(1\.\d+(?:\.\d+)?)").expect("valid regex")
});
/// Loader mod-list lines: `- modid 1.2.3` (fabric) or `modid@1.2.3`.
static MOD_LIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*[-|]{1,2}\s+([a-z][a-z0-9_-]{2,})\s+v?\d").expect("valid regex")
});
static MOD_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)mod(?:\s+id)?\s+'([a-z0-9_-]+)'").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct SanitizedCrash {
    pub text: String,
    pub mc_version: Option<String>,
    pub mod_loader: Option<String>,
    pub error_kind_hint: Option<CrashErrorKind>,
    pub stack_trace: String,
    pub mods_in_log: Vec<String>,
}

pub fn sanitize(raw_log: &str) -> SanitizedCrash {
    let redacted = redact(raw_log);

    let mc_version = MC_VERSION_RE
        .captures(&redacted)
        .map(|c| c[1].to_string());
    let mod_loader = detect_loader(&redacted);
    let error_kind_hint = detect_error_kind(&redacted);
    let stack_trace = extract_stack_trace(&redacted);
    let mods_in_log = extract_mod_list(&redacted);
    let text = truncate_preserving_error(&redacted);

    SanitizedCrash { text, mc_version, mod_loader, error_kind_hint, stack_trace, mods_in_log }
}

fn redact(log: &str) -> String {
    let log = WINDOWS_HOME_RE.replace_all(log, r"C:\Users\<user>");
    let log = UNIX_HOME_RE.replace_all(&log, "<home>");
    let log = IP_RE.replace_all(&log, "<ip>");
    let log = UUID_RE.replace_all(&log, "<uuid>");
    let log = CLOCK_TS_RE.replace_all(&log, "[<ts>]");
    ISO_TS_RE.replace_all(&log, "<ts>").into_owned()
}

fn detect_loader(log: &str) -> Option<String> {
    let lower = log.to_lowercase();
    if lower.contains("neoforge") {
        Some("neoforge".to_string())
    } else if lower.contains("quilt loader") || lower.contains("quilt_loader") {
        Some("quilt".to_string())
    } else if lower.contains("fabric loader") || lower.contains("fabricloader") {
        Some("fabric".to_string())
    } else if lower.contains("forge") {
        Some("forge".to_string())
    } else {
        None
    }
}

fn detect_error_kind(log: &str) -> Option<CrashErrorKind> {
    let lower = log.to_lowercase();

    // Ordered: the more specific signatures first.
    if lower.contains("requires") && lower.contains("which is missing")
        || lower.contains("missing dependencies")
        || lower.contains("unmet dependency")
    {
        Some(CrashErrorKind::MissingDependency)
    } else if lower.contains("mixin apply failed")
        || lower.contains("mixintransformererror")
        || lower.contains("mixin injection")
    {
        Some(CrashErrorKind::MixinError)
    } else if lower.contains("outofmemoryerror") || lower.contains("out of memory") {
        Some(CrashErrorKind::Memory)
    } else if lower.contains("classnotfoundexception") || lower.contains("noclassdeffounderror") {
        Some(CrashErrorKind::ClassNotFound)
    } else if lower.contains("fabric") && (lower.contains("on forge") || lower.contains("forge loader"))
    {
        Some(CrashErrorKind::FabricOnForge)
    } else if lower.contains("incompatible mod") || lower.contains("duplicate mod") {
        Some(CrashErrorKind::ModConflict)
    } else {
        None
    }
}

/// First exception block: the line naming the throwable plus its `at ...`
/// and `Caused by:` lines.
fn extract_stack_trace(log: &str) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.iter().position(|l| {
        l.contains("Exception") || l.contains("Error:") || l.trim_start().starts_with("Caused by:")
    });

    let Some(start) = start else {
        return String::new();
    };

    let mut out = Vec::new();
    for line in lines.iter().skip(start) {
        let trimmed = line.trim_start();
        let is_trace_line = trimmed.starts_with("at ")
            || trimmed.starts_with("Caused by:")
            || trimmed.starts_with("...")
            || out.is_empty();
        if !is_trace_line {
            break;
        }
        out.push(*line);
        if out.len() >= STACK_TRACE_MAX_LINES {
            break;
        }
    }

    out.join("\n")
}

fn extract_mod_list(log: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut mods = Vec::new();

    for captures in MOD_LIST_RE.captures_iter(log).chain(MOD_ID_RE.captures_iter(log)) {
        let id = captures[1].to_lowercase();
        if id != "minecraft" && id != "java" && seen.insert(id.clone()) {
            mods.push(id);
        }
    }

    mods
}

/// Keep the head and the window around the first error marker past it.
fn truncate_preserving_error(log: &str) -> String {
    if log.chars().count() <= MAX_LOG_CHARS {
        return log.to_string();
    }

    let chars: Vec<char> = log.chars().collect();
    let head: String = chars[..HEAD_CHARS].iter().collect();
    let tail_budget = MAX_LOG_CHARS - HEAD_CHARS;

    let rest: String = chars[HEAD_CHARS..].iter().collect();
    let lower = rest.to_lowercase();
    let marker = ["exception", "caused by", "error"]
        .iter()
        .filter_map(|m| lower.find(m))
        .min();

    let window: String = match marker {
        Some(pos) => {
            // center the window on the error
            let rest_chars: Vec<char> = rest.chars().collect();
            let pos_chars = rest[..pos].chars().count();
            let start = pos_chars.saturating_sub(tail_budget / 4);
            rest_chars[start..].iter().take(tail_budget).collect()
        },
        None => {
            let rest_chars: Vec<char> = rest.chars().collect();
            let start = rest_chars.len().saturating_sub(tail_budget);
            rest_chars[start..].iter().collect()
        },
    };

    format!("{}\n... [log truncated] ...\n{}", head, window)
}

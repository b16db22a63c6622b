//! Cross-loader compatibility policy.
//!
//! Declarative rules applied after dependency closure: loader-native APIs
//! are stripped from alien loaders, bridge mods are appended when a Fabric
//! pack opts into running Forge-native mods, and rendering optimizers are
//! swapped for the target's equivalent. The rules are data; the evaluator
//! just walks the tables. Bridge mods emitted here go back through the
//! dependency resolver like any other selection.

use crate::models::mods::ModEntry;

/// Loader-native APIs that must never ship on the listed loaders, even in
/// compatibility mode.
const FORBIDDEN_ON: &[(&str, &[&str])] = &[("fabric-api", &["forge", "neoforge"])];

/// Bridge set appended when Forge-native mods ride in a Fabric pack with
/// compatibility mode enabled.
const FABRIC_COMPAT_BRIDGES: &[&str] = &["connector", "forgified-fabric-api"];

const FORGE_FAMILY: &[&str] = &["forge", "neoforge"];

/// Rendering-optimizer equivalents: (loader, version prefix, slug). First
/// matching row wins; an empty prefix matches every version.
const RENDER_OPTIMIZERS: &[(&str, &str, &str)] = &[
    ("fabric", "", "sodium"),
    ("quilt", "", "sodium"),
    ("neoforge", "1.20", "embeddium"),
    ("neoforge", "", "sodium"),
    ("forge", "", "embeddium"),
];

/// Slugs recognized as members of the rendering-optimizer family.
const RENDERER_FAMILY: &[&str] = &["sodium", "embeddium", "rubidium", "magnesium"];

#[derive(Debug, Default)]
pub struct BridgePlan {
    /// Source ids to drop from the selection.
    pub removed: Vec<String>,
    /// Slugs to append (resolved through the store and dependency resolver).
    pub bridge_slugs: Vec<&'static str>,
    /// Human-readable policy notes surfaced as warnings.
    pub notes: Vec<String>,
}

/// The renderer slug appropriate for the target, from the equivalence table.
pub fn preferred_renderer(loader: &str, mc_version: &str) -> Option<&'static str> {
    RENDER_OPTIMIZERS
        .iter()
        .find(|(l, prefix, _)| *l == loader && mc_version.starts_with(prefix))
        .map(|(_, _, slug)| *slug)
}

/// Evaluate the policy over a resolved selection.
pub fn evaluate(
    mods: &[ModEntry],
    loader: &str,
    mc_version: &str,
    fabric_compat_mode: bool,
) -> BridgePlan {
    let mut plan = BridgePlan::default();

    let mut alien_forge_mods = false;

    for entry in mods {
        if let Some((slug, _)) = FORBIDDEN_ON
            .iter()
            .find(|(slug, loaders)| entry.slug == *slug && loaders.contains(&loader))
        {
            plan.removed.push(entry.source_id.clone());
            plan.notes
                .push(format!("{} is not usable on {} and was removed", slug, loader));
            continue;
        }

        if entry.supports_loader(loader) {
            continue;
        }

        // A loader-exclusive mod on the wrong loader: bridge it on Fabric in
        // compat mode, otherwise drop it.
        let is_forge_native = FORGE_FAMILY.iter().any(|l| entry.loaders.contains(*l));
        if loader == "fabric" && is_forge_native && fabric_compat_mode {
            alien_forge_mods = true;
            continue;
        }

        plan.removed.push(entry.source_id.clone());
        if RENDERER_FAMILY.contains(&entry.slug.as_str()) {
            if let Some(equivalent) = preferred_renderer(loader, mc_version) {
                if equivalent != entry.slug && !plan.bridge_slugs.contains(&equivalent) {
                    plan.bridge_slugs.push(equivalent);
                    plan.notes.push(format!(
                        "{} replaced with {} for {} {}",
                        entry.slug, equivalent, loader, mc_version
                    ));
                    continue;
                }
            }
        }
        plan.notes
            .push(format!("{} has no build for {} and was removed", entry.slug, loader));
    }

    if alien_forge_mods {
        for bridge in FABRIC_COMPAT_BRIDGES {
            if !plan.bridge_slugs.contains(bridge) {
                plan.bridge_slugs.push(bridge);
            }
        }
        plan.notes.push(
            "Forge-native mods detected; Connector bridge set added for compatibility mode"
                .to_string(),
        );
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn make_mod(source_id: &str, slug: &str, loaders: &[&str]) -> ModEntry {
        ModEntry {
            source_id: source_id.to_string(),
            slug: slug.to_string(),
            name: slug.to_string(),
            summary: String::new(),
            description: String::new(),
            icon_url: None,
            loaders: loaders.iter().map(|s| s.to_string()).collect(),
            game_versions: ["1.21.1".to_string()].into(),
            capabilities: HashSet::new(),
            modrinth_categories: HashSet::new(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            incompatibilities: HashMap::new(),
            downloads: 0,
            followers: 0,
            embedding: None,
        }
    }

    #[test]
    fn fabric_api_is_forbidden_on_neoforge_even_in_compat_mode() {
        let mods = vec![make_mod("fapi", "fabric-api", &["fabric"])];
        let plan = evaluate(&mods, "neoforge", "1.20.1", true);
        assert_eq!(plan.removed, vec!["fapi"]);
        assert!(plan.bridge_slugs.is_empty());
    }

    #[test]
    fn fabric_api_stays_on_fabric() {
        let mods = vec![make_mod("fapi", "fabric-api", &["fabric"])];
        let plan = evaluate(&mods, "fabric", "1.21.1", false);
        assert!(plan.removed.is_empty());
    }

    #[test]
    fn compat_mode_bridges_forge_mods_into_fabric_packs() {
        let mods = vec![
            make_mod("a", "create", &["forge", "neoforge"]),
            make_mod("b", "sodium", &["fabric"]),
        ];
        let plan = evaluate(&mods, "fabric", "1.21.1", true);
        assert!(plan.removed.is_empty());
        assert_eq!(plan.bridge_slugs, vec!["connector", "forgified-fabric-api"]);
    }

    #[test]
    fn without_compat_mode_forge_exclusives_are_removed() {
        let mods = vec![make_mod("a", "create", &["forge", "neoforge"])];
        let plan = evaluate(&mods, "fabric", "1.21.1", false);
        assert_eq!(plan.removed, vec!["a"]);
        assert!(plan.bridge_slugs.is_empty());
    }

    #[test]
    fn universal_mods_pass_any_loader() {
        let mods = vec![make_mod("u", "universal-lib", &["universal"])];
        let plan = evaluate(&mods, "neoforge", "1.20.1", false);
        assert!(plan.removed.is_empty());
    }

    #[test]
    fn renderer_swapped_for_target_equivalent() {
        let mods = vec![make_mod("s", "sodium", &["fabric"])];
        let plan = evaluate(&mods, "forge", "1.20.1", false);
        assert_eq!(plan.removed, vec!["s"]);
        assert_eq!(plan.bridge_slugs, vec!["embeddium"]);
    }

    #[test]
    fn renderer_table_is_version_aware() {
        assert_eq!(preferred_renderer("neoforge", "1.20.1"), Some("embeddium"));
        assert_eq!(preferred_renderer("neoforge", "1.21.1"), Some("sodium"));
        assert_eq!(preferred_renderer("fabric", "1.21.1"), Some("sodium"));
    }
}

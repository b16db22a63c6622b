//! End-to-end assembly pipeline tests with scripted model replies.

use tokio_util::sync::CancellationToken;

use super::common::*;
use crate::services::assembly::AssemblyRequest;
use crate::services::progress::{ProgressEventType, progress_channel};

fn request(prompt: &str, loader: &str, mc_version: &str, max_mods: i64) -> AssemblyRequest {
    AssemblyRequest {
        prompt: prompt.to_string(),
        mc_version: mc_version.to_string(),
        mod_loader: loader.to_string(),
        max_mods,
        current_mods: vec![],
        project_id: Some("proj-1".to_string()),
        fabric_compat_mode: false,
        use_v3_architecture: true,
    }
}

/// Drain the stream into (stage names, terminal event).
async fn collect_events(
    mut rx: tokio::sync::mpsc::Receiver<crate::services::progress::ProgressEvent>,
) -> (Vec<String>, crate::services::progress::ProgressEvent) {
    let mut stages = Vec::new();
    let mut terminal = None;
    while let Some(event) = rx.recv().await {
        match event.event_type {
            ProgressEventType::Stage => {
                stages.push(event.data["name"].as_str().unwrap_or_default().to_string())
            },
            ProgressEventType::Partial => {},
            _ => terminal = Some(event),
        }
    }
    (stages, terminal.expect("terminal event"))
}

fn simple_catalog() -> Vec<crate::models::mods::ModEntry> {
    vec![
        with_required_dep(
            catalog_mod("sodium-id", "Sodium", &["fabric"], &["performance.render"]),
            "fabric-api-id",
        ),
        catalog_mod("lithium-id", "Lithium", &["fabric"], &["performance.tick"]),
        catalog_mod("fabric-api-id", "Fabric API", &["fabric"], &["dependency.library", "api.exposed"]),
    ]
}

fn script_simple_add(harness: &Harness) {
    harness.transport.script(
        "query_plan",
        serde_json::json!({
            "request_type": "simple_add",
            "use_architecture_planner": false,
            "search_queries": [
                {"kind": "keyword", "text": "sodium", "weight": 1.0},
                {"kind": "keyword", "text": "lithium", "weight": 1.0},
                {"kind": "semantic", "text": "performance mods", "weight": 0.5}
            ],
            "capabilities_focus": [],
            "baseline_mods": ["sodium-id", "lithium-id"]
        }),
    );
    harness.transport.script(
        "final_selection",
        serde_json::json!({
            "selections": [
                {"source_id": "sodium-id", "category_index": null, "reason": "requested by name", "role": "primary"},
                {"source_id": "lithium-id", "category_index": null, "reason": "requested by name", "role": "primary"}
            ]
        }),
    );
    harness.transport.script(
        "categorize",
        serde_json::json!({
            "assignments": [
                {"source_id": "fabric-api-id", "category": "Libraries"},
                {"source_id": "lithium-id", "category": "Performance"},
                {"source_id": "sodium-id", "category": "Performance"}
            ]
        }),
    );
}

#[tokio::test]
async fn simple_add_assembles_requested_mods_with_dependencies() {
    let harness = Harness::new(&simple_catalog()).await;
    seed_user(&harness.pool, "u1", "test").await;
    script_simple_add(&harness);

    let pipeline = harness.assembly_pipeline();
    let (progress, rx) = progress_channel();
    let user = harness.store.get_user("u1").await.unwrap().unwrap();

    pipeline
        .run(
            user,
            request("add sodium and lithium", "fabric", "1.21.1", 15),
            progress,
            CancellationToken::new(),
        )
        .await;

    let (stages, terminal) = collect_events(rx).await;
    assert_eq!(terminal.event_type, ProgressEventType::Complete);
    assert!(stages.contains(&"plan".to_string()));
    assert!(stages.contains(&"retrieve".to_string()));
    assert!(!stages.contains(&"architecture".to_string()));

    let payload = &terminal.data;
    assert_eq!(payload["success"], true);
    assert_eq!(payload["stats"]["request_type"], "simple_add");

    let board = &payload["board_state"];
    let slugs: Vec<&str> = board["mods"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["slug"].as_str().unwrap())
        .collect();
    assert!(slugs.contains(&"sodium"));
    assert!(slugs.contains(&"lithium"));
    // the required dependency rides along
    assert!(slugs.contains(&"fabric-api"));

    let category_titles: Vec<&str> = board["categories"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["title"].as_str().unwrap())
        .collect();
    assert!(category_titles.contains(&"Performance"));
    assert!(category_titles.contains(&"Libraries"));

    // every board mod's category id must exist
    let category_ids: Vec<&str> = board["categories"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    for m in board["mods"].as_array().unwrap() {
        assert!(category_ids.contains(&m["category_id"].as_str().unwrap()));
    }

    // counters committed exactly once, tokens charged
    let (daily, monthly, tokens) = harness.user_counters("u1").await;
    assert_eq!(daily, 1);
    assert_eq!(monthly, 1);
    assert!(tokens > 0);
    assert!(payload["stats"]["tokens"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn themed_flow_plans_architecture_and_keeps_fabric_api_off_neoforge() {
    let mut catalog = vec![
        catalog_mod("swords-id", "Epic Swords", &["neoforge"], &["combat.weapons"]),
        catalog_mod("spells-id", "Arcane Spells", &["neoforge"], &["magic.spells"]),
        catalog_mod("castles-id", "Castle Kit", &["neoforge"], &["building.decoration"]),
        catalog_mod("ruins-id", "Ancient Ruins", &["neoforge"], &["worldgen.structures"]),
        catalog_mod("quests-id", "Quest Lines", &["neoforge"], &["adventure.quests"]),
        catalog_mod("fabric-api-id", "Fabric API", &["fabric"], &["dependency.library"]),
    ];
    // a universal library that everything may depend on
    catalog.push(catalog_mod(
        "arch-lib-id",
        "Architectury",
        &["universal"],
        &["dependency.library"],
    ));

    let harness = Harness::new(&catalog).await;
    seed_user(&harness.pool, "u2", "premium").await;
    insert_modpack(
        &harness.pool,
        "ref-1",
        "Medieval Legends",
        "neoforge",
        "1.20.1",
        &[
            ("combat.weapons", &["swords-id"][..]),
            ("magic.spells", &["spells-id"][..]),
            ("building.decoration", &["castles-id"][..]),
        ],
    )
    .await;

    harness.transport.script(
        "query_plan",
        serde_json::json!({
            "request_type": "themed_pack",
            "use_architecture_planner": true,
            "search_queries": [
                {"kind": "semantic", "text": "medieval fantasy castles", "weight": 1.0},
                {"kind": "keyword", "text": "medieval castle magic", "weight": 0.8},
                {"kind": "keyword", "text": "swords quests ruins", "weight": 0.6}
            ],
            "capabilities_focus": [],
            "baseline_mods": []
        }),
    );
    harness.transport.script(
        "architecture_plan",
        serde_json::json!({
            "categories": [
                {"name": "Combat", "description": "", "required_capabilities": ["combat.weapons"], "preferred_capabilities": [], "target_mods": 2},
                {"name": "Magic", "description": "", "required_capabilities": ["magic.spells"], "preferred_capabilities": [], "target_mods": 2},
                {"name": "Building", "description": "", "required_capabilities": ["building.decoration"], "preferred_capabilities": [], "target_mods": 2},
                {"name": "World", "description": "", "required_capabilities": ["worldgen.structures"], "preferred_capabilities": [], "target_mods": 1},
                {"name": "Adventure", "description": "", "required_capabilities": ["adventure.quests"], "preferred_capabilities": [], "target_mods": 1}
            ],
            "pack_archetype": "medieval fantasy",
            "estimated_total_mods": 8
        }),
    );
    harness.transport.script(
        "final_selection",
        serde_json::json!({
            "selections": [
                {"source_id": "swords-id", "category_index": 0, "reason": "medieval combat", "role": "primary"},
                {"source_id": "spells-id", "category_index": 1, "reason": "magic", "role": "primary"},
                {"source_id": "castles-id", "category_index": 2, "reason": "castles", "role": "primary"},
                {"source_id": "ruins-id", "category_index": 3, "reason": "world structures", "role": "primary"},
                {"source_id": "quests-id", "category_index": 4, "reason": "quests", "role": "primary"}
            ]
        }),
    );
    harness.transport.script(
        "architecture_refine",
        serde_json::json!({
            "categories": [
                {"name": "Combat", "mod_ids": ["swords-id"]},
                {"name": "Magic", "mod_ids": ["spells-id"]},
                {"name": "Building", "mod_ids": ["castles-id"]},
                {"name": "World", "mod_ids": ["ruins-id"]},
                {"name": "Adventure", "mod_ids": ["quests-id"]}
            ]
        }),
    );

    let pipeline = harness.assembly_pipeline();
    let (progress, rx) = progress_channel();
    let user = harness.store.get_user("u2").await.unwrap().unwrap();

    pipeline
        .run(
            user,
            request("medieval fantasy with castles and magic", "neoforge", "1.20.1", 8),
            progress,
            CancellationToken::new(),
        )
        .await;

    let (stages, terminal) = collect_events(rx).await;
    assert_eq!(terminal.event_type, ProgressEventType::Complete);
    assert!(stages.contains(&"architecture".to_string()));

    let payload = &terminal.data;
    assert_eq!(payload["stats"]["request_type"], "themed_pack");

    let slugs: Vec<&str> = payload["board_state"]["mods"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["slug"].as_str().unwrap())
        .collect();
    assert!(slugs.contains(&"epic-swords"));
    // never on a NeoForge target
    assert!(!slugs.contains(&"fabric-api"));

    let (daily, _, _) = harness.user_counters("u2").await;
    assert_eq!(daily, 1);
}

#[tokio::test]
async fn cancellation_before_completion_increments_nothing() {
    let harness = Harness::new(&simple_catalog()).await;
    seed_user(&harness.pool, "u3", "test").await;
    script_simple_add(&harness);

    let pipeline = harness.assembly_pipeline();
    let (progress, rx) = progress_channel();
    let user = harness.store.get_user("u3").await.unwrap().unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    pipeline
        .run(user, request("add sodium", "fabric", "1.21.1", 15), progress, cancel)
        .await;

    let (_, terminal) = collect_events(rx).await;
    assert_eq!(terminal.event_type, ProgressEventType::Error);

    let (daily, monthly, tokens) = harness.user_counters("u3").await;
    assert_eq!((daily, monthly, tokens), (0, 0, 0));
}

#[tokio::test]
async fn unparseable_model_output_fails_with_llm_invalid_output() {
    let harness = Harness::new(&simple_catalog()).await;
    seed_user(&harness.pool, "u4", "test").await;
    // both the original and the repair attempt return garbage
    harness
        .transport
        .script("query_plan", serde_json::json!("this is not a plan"));

    let pipeline = harness.assembly_pipeline();
    let (progress, rx) = progress_channel();
    let user = harness.store.get_user("u4").await.unwrap().unwrap();

    pipeline
        .run(
            user,
            request("add sodium", "fabric", "1.21.1", 15),
            progress,
            CancellationToken::new(),
        )
        .await;

    let (_, terminal) = collect_events(rx).await;
    assert_eq!(terminal.event_type, ProgressEventType::Error);
    assert_eq!(terminal.data["kind"], "llm_invalid_output");

    // failed pipelines never move counters
    let (daily, monthly, _) = harness.user_counters("u4").await;
    assert_eq!((daily, monthly), (0, 0));
}

#[tokio::test]
async fn no_candidates_completes_with_warning_and_empty_board() {
    // catalog has no mods for the requested loader
    let harness = Harness::new(&[catalog_mod(
        "forge-only-id",
        "Forge Thing",
        &["forge"],
        &["gameplay"],
    )])
    .await;
    seed_user(&harness.pool, "u5", "test").await;
    harness.transport.script(
        "query_plan",
        serde_json::json!({
            "request_type": "simple_add",
            "use_architecture_planner": false,
            "search_queries": [
                {"kind": "keyword", "text": "anything", "weight": 1.0},
                {"kind": "keyword", "text": "else", "weight": 0.5},
                {"kind": "semantic", "text": "whatever", "weight": 0.5}
            ],
            "capabilities_focus": [],
            "baseline_mods": []
        }),
    );

    let pipeline = harness.assembly_pipeline();
    let (progress, rx) = progress_channel();
    let user = harness.store.get_user("u5").await.unwrap().unwrap();

    pipeline
        .run(
            user,
            request("anything", "fabric", "1.21.1", 10),
            progress,
            CancellationToken::new(),
        )
        .await;

    let (_, terminal) = collect_events(rx).await;
    assert_eq!(terminal.event_type, ProgressEventType::Complete);
    assert!(terminal.data["board_state"]["mods"].as_array().unwrap().is_empty());
    assert!(
        terminal.data["warnings"]
            .as_array()
            .unwrap()
            .iter()
            .any(|w| w.as_str().unwrap().contains("no candidates"))
    );
}

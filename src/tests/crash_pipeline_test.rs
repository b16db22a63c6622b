//! End-to-end crash-analysis pipeline tests with scripted model replies.

use tokio_util::sync::CancellationToken;

use super::common::*;

const CRASH_LOG: &str = "\
Minecraft Version: 1.21.1
Fabric Loader 0.16.0
Loaded mods:
\t- sodium 0.5.8
net.fabricmc.loader.impl.FormattedException: Mod sodium requires fabric-api, which is missing!
    at net.fabricmc.loader.impl.FabricLoaderImpl.load(FabricLoaderImpl.java:196)";

fn script_missing_dependency(harness: &Harness) {
    harness.transport.script(
        "crash_analysis",
        serde_json::json!({
            "root_cause": "Sodium requires Fabric API, which is not installed.",
            "error_kind": "missing_dependency",
            "problematic_mods": [{"name": "sodium", "reason": "unsatisfied dependency on fabric-api"}],
            "confidence": 0.92,
            "suggested_fixes": [{
                "action": "add_mod",
                "target_mod": "fabric-api",
                "to_version": null,
                "source_id": "fabric-api",
                "reason": "required by sodium",
                "priority": "critical"
            }]
        }),
    );
}

#[tokio::test]
async fn missing_dependency_crash_produces_add_mod_intent() {
    let harness = Harness::new(&[]).await;
    seed_user(&harness.pool, "u1", "test").await;
    script_missing_dependency(&harness);

    let pipeline = harness.crash_pipeline(vec![("P7dR8mSH", "fabric-api")]);
    let board = simple_board(&["sodium"]);
    let user = harness.store.get_user("u1").await.unwrap().unwrap();

    let payload = pipeline
        .run(
            &user,
            CRASH_LOG,
            None,
            &board,
            "1.21.1",
            "fabric",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(payload["success"], true);
    assert_eq!(payload["error_kind"], "missing_dependency");
    assert!(payload["confidence"].as_f64().unwrap() >= 0.7);

    let suggestions = payload["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["action"], "add_mod");
    assert_eq!(suggestions[0]["source_id"], "P7dR8mSH");

    // add_mod is intent-only: the patched board is unchanged
    let patched_mods = payload["patched_board_state"]["mods"].as_array().unwrap();
    assert_eq!(patched_mods.len(), board.mods.len());

    // fresh log, no stale warning
    assert!(
        !payload["warnings"]
            .as_array()
            .unwrap()
            .iter()
            .any(|w| w == "stale_log")
    );

    // session recorded
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM crash_sessions")
        .fetch_one(&harness.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    // counters committed with token usage
    let (daily, monthly, tokens) = harness.user_counters("u1").await;
    assert_eq!((daily, monthly), (1, 1));
    assert!(tokens > 0);
}

#[tokio::test]
async fn stale_log_is_flagged_but_analyzed() {
    let harness = Harness::new(&[]).await;
    seed_user(&harness.pool, "u2", "test").await;

    harness.transport.script(
        "crash_analysis",
        serde_json::json!({
            "root_cause": "Create flywheel renderer incompatibility.",
            "error_kind": "mod_conflict",
            "problematic_mods": [],
            "confidence": 0.5,
            "suggested_fixes": []
        }),
    );

    // the log lists five mods, the board holds one of them
    let stale_log = "\
Loaded mods:
\t- create 0.5.1
\t- flywheel 0.6.10
\t- botania 1.20.1
\t- mekanism 10.4.0
\t- sodium 0.5.8
java.lang.IllegalStateException: Rendering backend mismatch";

    let pipeline = harness.crash_pipeline(vec![]);
    let board = simple_board(&["sodium"]);
    let user = harness.store.get_user("u2").await.unwrap().unwrap();

    let payload = pipeline
        .run(&user, stale_log, None, &board, "1.20.1", "fabric", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(payload["success"], true);
    assert!(
        payload["warnings"]
            .as_array()
            .unwrap()
            .iter()
            .any(|w| w == "stale_log")
    );
}

#[tokio::test]
async fn identical_log_within_window_replays_cached_suggestions() {
    let harness = Harness::new(&[]).await;
    seed_user(&harness.pool, "u3", "test").await;
    script_missing_dependency(&harness);

    let pipeline = harness.crash_pipeline(vec![("P7dR8mSH", "fabric-api")]);
    let board = simple_board(&["sodium"]);
    let user = harness.store.get_user("u3").await.unwrap().unwrap();

    let first = pipeline
        .run(&user, CRASH_LOG, None, &board, "1.21.1", "fabric", &CancellationToken::new())
        .await
        .unwrap();
    let calls_after_first = harness.transport.call_count();

    let second = pipeline
        .run(&user, CRASH_LOG, None, &board, "1.21.1", "fabric", &CancellationToken::new())
        .await
        .unwrap();

    // no further model calls, byte-identical suggestions
    assert_eq!(harness.transport.call_count(), calls_after_first);
    assert_eq!(
        serde_json::to_string(&first["suggestions"]).unwrap(),
        serde_json::to_string(&second["suggestions"]).unwrap()
    );
    assert_eq!(first["session_id"], second["session_id"]);

    // only one session stored, but both completions count
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM crash_sessions")
        .fetch_one(&harness.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
    let (daily, _, _) = harness.user_counters("u3").await;
    assert_eq!(daily, 2);
}

#[tokio::test]
async fn unvalidatable_fix_becomes_warning() {
    let harness = Harness::new(&[]).await;
    seed_user(&harness.pool, "u4", "test").await;

    harness.transport.script(
        "crash_analysis",
        serde_json::json!({
            "root_cause": "Unknown mod interaction.",
            "error_kind": "unknown",
            "problematic_mods": [],
            "confidence": 0.4,
            "suggested_fixes": [
                {"action": "add_mod", "target_mod": "nonexistent-helper", "to_version": null,
                 "source_id": null, "reason": "guess", "priority": "low"},
                {"action": "disable_mod", "target_mod": "sodium", "to_version": null,
                 "source_id": null, "reason": "isolate the fault", "priority": "normal"}
            ]
        }),
    );

    // registry knows nothing
    let pipeline = harness.crash_pipeline(vec![]);
    let board = simple_board(&["sodium"]);
    let user = harness.store.get_user("u4").await.unwrap().unwrap();

    let payload = pipeline
        .run(
            &user,
            "java.lang.RuntimeException: mystery crash in sodium renderer",
            None,
            &board,
            "1.21.1",
            "fabric",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let suggestions = payload["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["action"], "disable_mod");
    assert!(
        payload["warnings"]
            .as_array()
            .unwrap()
            .iter()
            .any(|w| w.as_str().unwrap().contains("nonexistent-helper"))
    );

    // the disabled flag landed on the deep copy
    let patched = payload["patched_board_state"]["mods"].as_array().unwrap();
    assert!(patched.iter().any(|m| m["slug"] == "sodium" && m["is_disabled"] == true));
}

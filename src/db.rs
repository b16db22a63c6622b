//! Database pool setup.
//!
//! The catalog tables (`mods`, `mods_fts`, `modpacks`, `users`) are owned by
//! the external ingestion/migration jobs. The service only bootstraps the
//! append-only tables it writes itself, so a fresh deployment can start
//! before the first migration run without losing requests.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqlitePool, migrate::MigrateDatabase};
use std::str::FromStr;

pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    if !sqlx::Sqlite::database_exists(database_url).await.unwrap_or(false) {
        tracing::info!("Database does not exist, creating: {}", database_url);
        sqlx::Sqlite::create_database(database_url).await?;
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new().max_connections(16).connect_with(options).await?;

    ensure_service_tables(&pool).await?;

    Ok(pool)
}

/// Create the tables this service appends to, if missing.
pub async fn ensure_service_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crash_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            crash_log_sanitized TEXT NOT NULL,
            board_state_snapshot TEXT NOT NULL,
            root_cause TEXT NOT NULL,
            error_kind TEXT NOT NULL,
            confidence REAL NOT NULL,
            suggestions TEXT NOT NULL,
            warnings TEXT NOT NULL,
            patched_board_state TEXT NOT NULL,
            token_usage INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS modpack_builds (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            prompt TEXT NOT NULL,
            mc_version TEXT NOT NULL,
            mod_loader TEXT NOT NULL,
            request_type TEXT NOT NULL,
            mod_count INTEGER NOT NULL,
            dependency_count INTEGER NOT NULL,
            tokens_used INTEGER NOT NULL,
            cost_usd REAL NOT NULL,
            duration_ms INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_feedback (
            build_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            rating INTEGER NOT NULL,
            comment TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sort_feedback (
            build_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            accepted INTEGER NOT NULL,
            corrections TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

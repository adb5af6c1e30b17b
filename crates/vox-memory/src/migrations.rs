//! Database schema migrations.
//!
//! Applies the append-only turn log schema plus the schema_migrations
//! tracking table.

use rusqlite::Connection;
use tracing::info;

use vox_core::error::VoxError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental changes.
pub fn run_migrations(conn: &Connection) -> Result<(), VoxError> {
    // Create the migrations tracking table first.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| VoxError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| VoxError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: turn_log");
    }

    Ok(())
}

/// Version 1: append-only turn log.
fn apply_v1(conn: &Connection) -> Result<(), VoxError> {
    conn.execute_batch(
        "
        -- Conversation log, keyed by (session, turn). Rows are immutable
        -- once written; turn_id is strictly increasing per session.
        CREATE TABLE IF NOT EXISTS turns (
            session_id  TEXT NOT NULL,
            turn_id     INTEGER NOT NULL,
            timestamp   INTEGER NOT NULL,
            role        TEXT NOT NULL
                        CHECK (role IN ('user', 'assistant', 'system')),
            text        TEXT NOT NULL DEFAULT '',
            embedding   BLOB,
            action_json TEXT,
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (session_id, turn_id)
        );

        CREATE INDEX IF NOT EXISTS idx_turns_session_recent
            ON turns (session_id, turn_id DESC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'turn_log');
        ",
    )
    .map_err(|e| VoxError::Storage(format!("Failed to apply migration v1: {}", e)))?;
    Ok(())
}

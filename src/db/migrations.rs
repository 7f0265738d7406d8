//! Database migrations
//!
//! Versioned schema migrations tracked in `schema_migrations`. Each version is
//! applied inside its own transaction.

use crate::core::error::{CuratorError, Result};
use rusqlite::Connection;
use tracing::{info, warn};

/// Migration version tracking table
const MIGRATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

/// Initial schema migration (version 1)
const MIGRATION_V1: &str = r#"
-- Provider connections (at most one active)
CREATE TABLE IF NOT EXISTS provider_connections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    provider_type TEXT NOT NULL,
    url TEXT NOT NULL,
    credential TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_provider_connections_single_active
    ON provider_connections(active) WHERE active = 1;

-- Libraries
CREATE TABLE IF NOT EXISTS libraries (
    id TEXT PRIMARY KEY,
    provider_connection_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    name TEXT NOT NULL,
    media_type TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    rule_set TEXT,
    last_synced_at TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (provider_connection_id) REFERENCES provider_connections(id) ON DELETE CASCADE
);

-- Catalog mirror
CREATE TABLE IF NOT EXISTS catalog_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    library_id TEXT NOT NULL,
    tmdb_id TEXT,
    imdb_id TEXT,
    tvdb_id TEXT,
    title TEXT NOT NULL,
    year INTEGER,
    media_type TEXT NOT NULL,
    genres TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    collections TEXT NOT NULL DEFAULT '[]',
    studio TEXT,
    content_rating TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    content_hash TEXT NOT NULL,
    last_synced TEXT NOT NULL,
    UNIQUE(server_id, external_id)
);

CREATE INDEX IF NOT EXISTS idx_catalog_items_library ON catalog_items(library_id);

CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    library_id TEXT NOT NULL,
    name TEXT NOT NULL,
    item_count INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}',
    last_synced TEXT NOT NULL,
    UNIQUE(server_id, external_id)
);

-- Sync runs
CREATE TABLE IF NOT EXISTS sync_runs (
    id TEXT PRIMARY KEY,
    library_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    items_processed INTEGER NOT NULL DEFAULT 0,
    items_added INTEGER NOT NULL DEFAULT 0,
    items_updated INTEGER NOT NULL DEFAULT 0,
    items_failed INTEGER NOT NULL DEFAULT 0,
    items_removed INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_library ON sync_runs(library_id, started_at);

-- Classification rules
CREATE TABLE IF NOT EXISTS rules (
    id TEXT PRIMARY KEY,
    library_id TEXT NOT NULL,
    name TEXT NOT NULL,
    criteria TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    generated_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Pattern suggestions (one row per library)
CREATE TABLE IF NOT EXISTS pattern_suggestions (
    library_id TEXT PRIMARY KEY,
    detected_patterns TEXT NOT NULL,
    pending_count INTEGER NOT NULL DEFAULT 0,
    last_analyzed TEXT NOT NULL,
    dismissed INTEGER NOT NULL DEFAULT 0
);

-- Scheduled tasks
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    task_type TEXT NOT NULL,
    library_id TEXT,
    interval_minutes INTEGER,
    enabled INTEGER NOT NULL DEFAULT 1,
    next_run_at TEXT,
    last_run_at TEXT,
    run_count INTEGER NOT NULL DEFAULT 0,
    last_result TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due ON scheduled_tasks(enabled, next_run_at);
"#;

/// Rules are looked up by library and evaluated in priority order (version 2)
const MIGRATION_V2: &str = r#"
CREATE INDEX IF NOT EXISTS idx_rules_library ON rules(library_id);
CREATE INDEX IF NOT EXISTS idx_rules_priority ON rules(enabled, priority DESC, created_at);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1), (2, MIGRATION_V2)];

/// Bring the schema up to the latest version
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_TABLE)
        .map_err(CuratorError::DatabaseError)?;

    let current_version = current_version(conn)?;
    info!(current_version, "Running database migrations");

    for (version, sql) in MIGRATIONS {
        if current_version < *version {
            apply_migration(conn, *version, sql)?;
        }
    }

    Ok(())
}

/// Latest applied schema version (0 for a fresh database)
pub fn current_version(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(CuratorError::DatabaseError)
}

/// Apply a single migration
fn apply_migration(conn: &mut Connection, version: i64, sql: &str) -> Result<()> {
    let tx = conn.transaction().map_err(CuratorError::DatabaseError)?;

    tx.execute_batch(sql).map_err(|e| {
        warn!("Migration v{} failed: {}", version, e);
        CuratorError::DatabaseError(e)
    })?;

    tx.execute("INSERT INTO schema_migrations (version) VALUES (?)", [version])
        .map_err(CuratorError::DatabaseError)?;

    tx.commit().map_err(CuratorError::DatabaseError)?;

    info!("Migration v{} applied successfully", version);
    Ok(())
}

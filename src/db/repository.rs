//! Repository pattern implementation for data access layer
//!
//! One repository per aggregate. Each wraps the shared [`DatabaseManager`] and
//! runs its statements on the blocking pool. Timestamps are stored as RFC 3339
//! text and JSON columns as serialized text.

use crate::core::clock::{format_timestamp, parse_timestamp};
use crate::core::error::{CuratorError, Result};
use crate::core::rule_engine::PushdownQuery;
use crate::db::manager::DatabaseManager;
use crate::db::models::{
    CatalogItem, Collection, Library, PatternSuggestion, ProviderConnection, Rule,
    ScheduledTask, SyncKind, SyncRun, SyncStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Generic repository trait for CRUD operations
#[async_trait]
pub trait Repository<T>: Send + Sync {
    /// Find an entity by its ID
    async fn find_by_id(&self, id: &str) -> Result<Option<T>>;

    /// Find all entities
    async fn find_all(&self) -> Result<Vec<T>>;

    /// Create a new entity
    async fn create(&self, entity: &T) -> Result<()>;

    /// Update an existing entity
    async fn update(&self, entity: &T) -> Result<()>;

    /// Delete an entity by its ID; false when nothing was deleted
    async fn delete(&self, id: &str) -> Result<bool>;
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| conversion_error(idx, format!("invalid timestamp '{}'", raw)))
}

fn opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        parse_timestamp(&s).ok_or_else(|| conversion_error(idx, format!("invalid timestamp '{}'", s)))
    })
    .transpose()
}

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(CuratorError::DatabaseError)
}

// ---------------------------------------------------------------------------
// Provider connections
// ---------------------------------------------------------------------------

const CONNECTION_COLUMNS: &str = "id, name, provider_type, url, credential, active, created_at";

fn row_to_connection(row: &Row) -> rusqlite::Result<ProviderConnection> {
    let provider_type: String = row.get(2)?;
    Ok(ProviderConnection {
        id: row.get(0)?,
        name: row.get(1)?,
        provider_type: provider_type
            .parse()
            .map_err(|e: CuratorError| conversion_error(2, e.to_string()))?,
        url: row.get(3)?,
        credential: row.get(4)?,
        active: row.get(5)?,
        created_at: ts(row, 6)?,
    })
}

/// Repository for provider connections
pub struct ProviderConnectionRepository {
    db: Arc<DatabaseManager>,
}

impl ProviderConnectionRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// The single active connection, if any
    pub async fn find_active(&self) -> Result<Option<ProviderConnection>> {
        self.db
            .execute(|conn| {
                conn.query_row(
                    &format!(
                        "SELECT {} FROM provider_connections WHERE active = 1",
                        CONNECTION_COLUMNS
                    ),
                    [],
                    row_to_connection,
                )
                .optional()
                .map_err(CuratorError::DatabaseError)
            })
            .await
    }

    /// Make `id` the only active connection
    pub async fn activate(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .transaction(move |tx| {
                tx.execute(
                    "UPDATE provider_connections SET active = 0 WHERE active = 1 AND id != ?",
                    [&id],
                )
                .map_err(CuratorError::DatabaseError)?;
                let updated = tx
                    .execute(
                        "UPDATE provider_connections SET active = 1 WHERE id = ?",
                        [&id],
                    )
                    .map_err(CuratorError::DatabaseError)?;
                if updated == 0 {
                    return Err(CuratorError::NotFound(format!(
                        "Provider connection not found: {}",
                        id
                    )));
                }
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl Repository<ProviderConnection> for ProviderConnectionRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<ProviderConnection>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {} FROM provider_connections WHERE id = ?",
                        CONNECTION_COLUMNS
                    ),
                    [&id],
                    row_to_connection,
                )
                .optional()
                .map_err(CuratorError::DatabaseError)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<ProviderConnection>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM provider_connections ORDER BY created_at",
                        CONNECTION_COLUMNS
                    ))
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map([], row_to_connection)
                    .map_err(CuratorError::DatabaseError)?;
                collect_rows(rows)
            })
            .await
    }

    async fn create(&self, entity: &ProviderConnection) -> Result<()> {
        let c = entity.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO provider_connections (id, name, provider_type, url, credential, active, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                    params![
                        c.id,
                        c.name,
                        c.provider_type.as_str(),
                        c.url,
                        c.credential,
                        c.active,
                        format_timestamp(&c.created_at),
                    ],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn update(&self, entity: &ProviderConnection) -> Result<()> {
        let c = entity.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE provider_connections SET name = ?, provider_type = ?, url = ?, credential = ? \
                     WHERE id = ?",
                    params![c.name, c.provider_type.as_str(), c.url, c.credential, c.id],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let n = conn
                    .execute("DELETE FROM provider_connections WHERE id = ?", [&id])
                    .map_err(CuratorError::DatabaseError)?;
                Ok(n > 0)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Libraries
// ---------------------------------------------------------------------------

const LIBRARY_COLUMNS: &str = "id, provider_connection_id, external_id, name, media_type, enabled, \
     rule_set, last_synced_at, created_at";

fn row_to_library(row: &Row) -> rusqlite::Result<Library> {
    Ok(Library {
        id: row.get(0)?,
        provider_connection_id: row.get(1)?,
        external_id: row.get(2)?,
        name: row.get(3)?,
        media_type: row.get(4)?,
        enabled: row.get(5)?,
        rule_set: opt_json_col(row, 6)?,
        last_synced_at: opt_ts(row, 7)?,
        created_at: ts(row, 8)?,
    })
}

/// Repository for libraries
pub struct LibraryRepository {
    db: Arc<DatabaseManager>,
}

impl LibraryRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn update_last_synced(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE libraries SET last_synced_at = ? WHERE id = ?",
                    params![format_timestamp(&at), id],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl Repository<Library> for LibraryRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Library>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM libraries WHERE id = ?", LIBRARY_COLUMNS),
                    [&id],
                    row_to_library,
                )
                .optional()
                .map_err(CuratorError::DatabaseError)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<Library>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM libraries ORDER BY created_at, id",
                        LIBRARY_COLUMNS
                    ))
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map([], row_to_library)
                    .map_err(CuratorError::DatabaseError)?;
                collect_rows(rows)
            })
            .await
    }

    async fn create(&self, entity: &Library) -> Result<()> {
        let l = entity.clone();
        let rule_set = l.rule_set.as_ref().map(serde_json::to_string).transpose()?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO libraries (id, provider_connection_id, external_id, name, media_type, \
                     enabled, rule_set, last_synced_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        l.id,
                        l.provider_connection_id,
                        l.external_id,
                        l.name,
                        l.media_type,
                        l.enabled,
                        rule_set,
                        l.last_synced_at.as_ref().map(format_timestamp),
                        format_timestamp(&l.created_at),
                    ],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn update(&self, entity: &Library) -> Result<()> {
        let l = entity.clone();
        let rule_set = l.rule_set.as_ref().map(serde_json::to_string).transpose()?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE libraries SET name = ?, media_type = ?, enabled = ?, rule_set = ? WHERE id = ?",
                    params![l.name, l.media_type, l.enabled, rule_set, l.id],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let n = conn
                    .execute("DELETE FROM libraries WHERE id = ?", [&id])
                    .map_err(CuratorError::DatabaseError)?;
                Ok(n > 0)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Catalog items
// ---------------------------------------------------------------------------

const ITEM_COLUMNS: &str = "ci.server_id, ci.external_id, ci.library_id, ci.tmdb_id, ci.imdb_id, \
     ci.tvdb_id, ci.title, ci.year, ci.media_type, ci.genres, ci.tags, ci.collections, ci.studio, \
     ci.content_rating, ci.metadata, ci.content_hash, ci.last_synced";

fn row_to_item(row: &Row) -> rusqlite::Result<CatalogItem> {
    Ok(CatalogItem {
        server_id: row.get(0)?,
        external_id: row.get(1)?,
        library_id: row.get(2)?,
        tmdb_id: row.get(3)?,
        imdb_id: row.get(4)?,
        tvdb_id: row.get(5)?,
        title: row.get(6)?,
        year: row.get(7)?,
        media_type: row.get(8)?,
        genres: json_col(row, 9)?,
        tags: json_col(row, 10)?,
        collections: json_col(row, 11)?,
        studio: row.get(12)?,
        content_rating: row.get(13)?,
        metadata: json_col(row, 14)?,
        content_hash: row.get(15)?,
        last_synced: ts(row, 16)?,
    })
}

/// What an upsert did to the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
    /// Content hash identical; only `last_synced` was refreshed
    Unchanged,
}

/// Repository for the catalog mirror
pub struct CatalogItemRepository {
    db: Arc<DatabaseManager>,
}

impl CatalogItemRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Existence probe plus `INSERT .. ON CONFLICT DO UPDATE` on the natural key.
    /// Callers run this inside a transaction.
    pub fn upsert_with(conn: &Connection, item: &CatalogItem) -> Result<UpsertOutcome> {
        let existing: Option<String> = conn
            .query_row(
                "SELECT content_hash FROM catalog_items WHERE server_id = ? AND external_id = ?",
                [&item.server_id, &item.external_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(CuratorError::DatabaseError)?;

        conn.execute(
            "INSERT INTO catalog_items (server_id, external_id, library_id, tmdb_id, imdb_id, tvdb_id, \
             title, year, media_type, genres, tags, collections, studio, content_rating, metadata, \
             content_hash, last_synced) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17) \
             ON CONFLICT(server_id, external_id) DO UPDATE SET \
             library_id = excluded.library_id, tmdb_id = excluded.tmdb_id, imdb_id = excluded.imdb_id, \
             tvdb_id = excluded.tvdb_id, title = excluded.title, year = excluded.year, \
             media_type = excluded.media_type, genres = excluded.genres, tags = excluded.tags, \
             collections = excluded.collections, studio = excluded.studio, \
             content_rating = excluded.content_rating, metadata = excluded.metadata, \
             content_hash = excluded.content_hash, last_synced = excluded.last_synced",
            params![
                item.server_id,
                item.external_id,
                item.library_id,
                item.tmdb_id,
                item.imdb_id,
                item.tvdb_id,
                item.title,
                item.year,
                item.media_type,
                serde_json::to_string(&item.genres)?,
                serde_json::to_string(&item.tags)?,
                serde_json::to_string(&item.collections)?,
                item.studio,
                item.content_rating,
                serde_json::to_string(&item.metadata)?,
                item.content_hash,
                format_timestamp(&item.last_synced),
            ],
        )
        .map_err(CuratorError::DatabaseError)?;

        Ok(match existing {
            None => UpsertOutcome::Added,
            Some(hash) if hash == item.content_hash => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Updated,
        })
    }

    /// Upsert a single item in its own transaction
    pub async fn upsert(&self, item: &CatalogItem) -> Result<UpsertOutcome> {
        let item = item.clone();
        self.db
            .transaction(move |tx| Self::upsert_with(tx, &item))
            .await
    }

    pub async fn find(&self, server_id: &str, external_id: &str) -> Result<Option<CatalogItem>> {
        let (server_id, external_id) = (server_id.to_string(), external_id.to_string());
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {} FROM catalog_items ci WHERE ci.server_id = ? AND ci.external_id = ?",
                        ITEM_COLUMNS
                    ),
                    [&server_id, &external_id],
                    row_to_item,
                )
                .optional()
                .map_err(CuratorError::DatabaseError)
            })
            .await
    }

    /// Every item of a library (analysis input)
    pub async fn find_by_library(&self, library_id: &str) -> Result<Vec<CatalogItem>> {
        let library_id = library_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM catalog_items ci WHERE ci.library_id = ? \
                         ORDER BY ci.title, ci.external_id",
                        ITEM_COLUMNS
                    ))
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map([&library_id], row_to_item)
                    .map_err(CuratorError::DatabaseError)?;
                collect_rows(rows)
            })
            .await
    }

    /// One page of a library plus the library's total item count
    pub async fn list_by_library(
        &self,
        library_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(i64, Vec<CatalogItem>)> {
        let library_id = library_id.to_string();
        self.db
            .execute(move |conn| {
                let total: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM catalog_items WHERE library_id = ?",
                        [&library_id],
                        |row| row.get(0),
                    )
                    .map_err(CuratorError::DatabaseError)?;
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM catalog_items ci WHERE ci.library_id = ? \
                         ORDER BY ci.title, ci.external_id LIMIT ? OFFSET ?",
                        ITEM_COLUMNS
                    ))
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map(params![library_id, limit as i64, offset as i64], row_to_item)
                    .map_err(CuratorError::DatabaseError)?;
                Ok((total, collect_rows(rows)?))
            })
            .await
    }

    /// Remove items of a library last seen before `before`
    pub async fn delete_stale(&self, library_id: &str, before: DateTime<Utc>) -> Result<usize> {
        let library_id = library_id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "DELETE FROM catalog_items WHERE library_id = ? AND last_synced < ?",
                    params![library_id, format_timestamp(&before)],
                )
                .map_err(CuratorError::DatabaseError)
            })
            .await
    }

    /// Run a compiled pushdown filter: total match count and the first `limit` items by title
    pub fn query_matching_with(
        conn: &Connection,
        library_id: &str,
        query: &PushdownQuery,
        limit: usize,
    ) -> Result<(i64, Vec<CatalogItem>)> {
        let bound = query.bind(library_id);

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM catalog_items ci WHERE {}", query.filter),
                rusqlite::params_from_iter(bound.iter()),
                |row| row.get(0),
            )
            .map_err(CuratorError::DatabaseError)?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM catalog_items ci WHERE {} ORDER BY ci.title, ci.external_id LIMIT {}",
                ITEM_COLUMNS, query.filter, limit
            ))
            .map_err(CuratorError::DatabaseError)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bound.iter()), row_to_item)
            .map_err(CuratorError::DatabaseError)?;

        Ok((total, collect_rows(rows)?))
    }

    pub async fn query_matching(
        &self,
        library_id: &str,
        query: PushdownQuery,
        limit: usize,
    ) -> Result<(i64, Vec<CatalogItem>)> {
        let library_id = library_id.to_string();
        self.db
            .execute(move |conn| Self::query_matching_with(conn, &library_id, &query, limit))
            .await
    }
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// Repository for mirrored provider collections
pub struct CollectionRepository {
    db: Arc<DatabaseManager>,
}

impl CollectionRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn upsert(&self, collection: &Collection) -> Result<()> {
        let c = collection.clone();
        let metadata = serde_json::to_string(&c.metadata)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO collections (server_id, external_id, library_id, name, item_count, metadata, last_synced) \
                     VALUES (?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT(server_id, external_id) DO UPDATE SET \
                     library_id = excluded.library_id, name = excluded.name, \
                     item_count = excluded.item_count, metadata = excluded.metadata, \
                     last_synced = excluded.last_synced",
                    params![
                        c.server_id,
                        c.external_id,
                        c.library_id,
                        c.name,
                        c.item_count,
                        metadata,
                        format_timestamp(&c.last_synced),
                    ],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    pub async fn find_by_library(&self, library_id: &str) -> Result<Vec<Collection>> {
        let library_id = library_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT server_id, external_id, library_id, name, item_count, metadata, last_synced \
                         FROM collections WHERE library_id = ? ORDER BY name",
                    )
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map([&library_id], |row| {
                        Ok(Collection {
                            server_id: row.get(0)?,
                            external_id: row.get(1)?,
                            library_id: row.get(2)?,
                            name: row.get(3)?,
                            item_count: row.get(4)?,
                            metadata: json_col(row, 5)?,
                            last_synced: ts(row, 6)?,
                        })
                    })
                    .map_err(CuratorError::DatabaseError)?;
                collect_rows(rows)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Sync runs
// ---------------------------------------------------------------------------

const SYNC_RUN_COLUMNS: &str = "id, library_id, kind, status, items_processed, items_added, \
     items_updated, items_failed, items_removed, error, started_at, completed_at";

fn row_to_sync_run(row: &Row) -> rusqlite::Result<SyncRun> {
    let kind: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(SyncRun {
        id: row.get(0)?,
        library_id: row.get(1)?,
        kind: SyncKind::from_db(&kind),
        status: SyncStatus::from_db(&status),
        items_processed: row.get(4)?,
        items_added: row.get(5)?,
        items_updated: row.get(6)?,
        items_failed: row.get(7)?,
        items_removed: row.get(8)?,
        error: row.get(9)?,
        started_at: ts(row, 10)?,
        completed_at: opt_ts(row, 11)?,
    })
}

/// Repository for sync run bookkeeping
pub struct SyncRunRepository {
    db: Arc<DatabaseManager>,
}

impl SyncRunRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Most recent runs of a library first
    pub async fn find_by_library(&self, library_id: &str, limit: usize) -> Result<Vec<SyncRun>> {
        let library_id = library_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM sync_runs WHERE library_id = ? ORDER BY started_at DESC LIMIT ?",
                        SYNC_RUN_COLUMNS
                    ))
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map(params![library_id, limit as i64], row_to_sync_run)
                    .map_err(CuratorError::DatabaseError)?;
                collect_rows(rows)
            })
            .await
    }
}

#[async_trait]
impl Repository<SyncRun> for SyncRunRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<SyncRun>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM sync_runs WHERE id = ?", SYNC_RUN_COLUMNS),
                    [&id],
                    row_to_sync_run,
                )
                .optional()
                .map_err(CuratorError::DatabaseError)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<SyncRun>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM sync_runs ORDER BY started_at DESC",
                        SYNC_RUN_COLUMNS
                    ))
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map([], row_to_sync_run)
                    .map_err(CuratorError::DatabaseError)?;
                collect_rows(rows)
            })
            .await
    }

    async fn create(&self, entity: &SyncRun) -> Result<()> {
        let r = entity.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO sync_runs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        SYNC_RUN_COLUMNS
                    ),
                    params![
                        r.id,
                        r.library_id,
                        r.kind.as_str(),
                        r.status.as_str(),
                        r.items_processed,
                        r.items_added,
                        r.items_updated,
                        r.items_failed,
                        r.items_removed,
                        r.error,
                        format_timestamp(&r.started_at),
                        r.completed_at.as_ref().map(format_timestamp),
                    ],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    /// Persist status, running totals, error and completion time
    async fn update(&self, entity: &SyncRun) -> Result<()> {
        let r = entity.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE sync_runs SET status = ?, items_processed = ?, items_added = ?, \
                     items_updated = ?, items_failed = ?, items_removed = ?, error = ?, completed_at = ? \
                     WHERE id = ?",
                    params![
                        r.status.as_str(),
                        r.items_processed,
                        r.items_added,
                        r.items_updated,
                        r.items_failed,
                        r.items_removed,
                        r.error,
                        r.completed_at.as_ref().map(format_timestamp),
                        r.id,
                    ],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let n = conn
                    .execute("DELETE FROM sync_runs WHERE id = ?", [&id])
                    .map_err(CuratorError::DatabaseError)?;
                Ok(n > 0)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

const RULE_COLUMNS: &str =
    "id, library_id, name, criteria, priority, enabled, generated_by, created_at, updated_at";

fn row_to_rule(row: &Row) -> rusqlite::Result<Rule> {
    Ok(Rule {
        id: row.get(0)?,
        library_id: row.get(1)?,
        name: row.get(2)?,
        criteria: json_col(row, 3)?,
        priority: row.get(4)?,
        enabled: row.get(5)?,
        generated_by: row.get(6)?,
        created_at: ts(row, 7)?,
        updated_at: ts(row, 8)?,
    })
}

/// Repository for classification rules
pub struct RuleRepository {
    db: Arc<DatabaseManager>,
}

impl RuleRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn find_by_library(&self, library_id: &str) -> Result<Vec<Rule>> {
        let library_id = library_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM rules WHERE library_id = ? ORDER BY priority DESC, created_at",
                        RULE_COLUMNS
                    ))
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map([&library_id], row_to_rule)
                    .map_err(CuratorError::DatabaseError)?;
                collect_rows(rows)
            })
            .await
    }

    /// Enabled rules in evaluation order: priority desc, then oldest first
    pub async fn find_enabled_by_priority(&self) -> Result<Vec<Rule>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM rules WHERE enabled = 1 ORDER BY priority DESC, created_at ASC, id ASC",
                        RULE_COLUMNS
                    ))
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map([], row_to_rule)
                    .map_err(CuratorError::DatabaseError)?;
                collect_rows(rows)
            })
            .await
    }
}

#[async_trait]
impl Repository<Rule> for RuleRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Rule>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM rules WHERE id = ?", RULE_COLUMNS),
                    [&id],
                    row_to_rule,
                )
                .optional()
                .map_err(CuratorError::DatabaseError)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<Rule>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM rules ORDER BY priority DESC, created_at",
                        RULE_COLUMNS
                    ))
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map([], row_to_rule)
                    .map_err(CuratorError::DatabaseError)?;
                collect_rows(rows)
            })
            .await
    }

    async fn create(&self, entity: &Rule) -> Result<()> {
        let r = entity.clone();
        let criteria = serde_json::to_string(&r.criteria)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO rules ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        RULE_COLUMNS
                    ),
                    params![
                        r.id,
                        r.library_id,
                        r.name,
                        criteria,
                        r.priority,
                        r.enabled,
                        r.generated_by,
                        format_timestamp(&r.created_at),
                        format_timestamp(&r.updated_at),
                    ],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn update(&self, entity: &Rule) -> Result<()> {
        let r = entity.clone();
        let criteria = serde_json::to_string(&r.criteria)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE rules SET name = ?, criteria = ?, priority = ?, enabled = ?, updated_at = ? \
                     WHERE id = ?",
                    params![
                        r.name,
                        criteria,
                        r.priority,
                        r.enabled,
                        format_timestamp(&r.updated_at),
                        r.id,
                    ],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let n = conn
                    .execute("DELETE FROM rules WHERE id = ?", [&id])
                    .map_err(CuratorError::DatabaseError)?;
                Ok(n > 0)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Pattern suggestions
// ---------------------------------------------------------------------------

/// Repository for per-library pattern suggestions
pub struct PatternSuggestionRepository {
    db: Arc<DatabaseManager>,
}

impl PatternSuggestionRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Overwrite the library's suggestion row
    pub async fn upsert(&self, suggestion: &PatternSuggestion) -> Result<()> {
        let s = suggestion.clone();
        let patterns = serde_json::to_string(&s.detected_patterns)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO pattern_suggestions (library_id, detected_patterns, pending_count, last_analyzed, dismissed) \
                     VALUES (?, ?, ?, ?, ?) \
                     ON CONFLICT(library_id) DO UPDATE SET \
                     detected_patterns = excluded.detected_patterns, pending_count = excluded.pending_count, \
                     last_analyzed = excluded.last_analyzed, dismissed = excluded.dismissed",
                    params![
                        s.library_id,
                        patterns,
                        s.pending_count,
                        format_timestamp(&s.last_analyzed),
                        s.dismissed,
                    ],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    pub async fn find_by_library(&self, library_id: &str) -> Result<Option<PatternSuggestion>> {
        let library_id = library_id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT library_id, detected_patterns, pending_count, last_analyzed, dismissed \
                     FROM pattern_suggestions WHERE library_id = ?",
                    [&library_id],
                    |row| {
                        Ok(PatternSuggestion {
                            library_id: row.get(0)?,
                            detected_patterns: json_col(row, 1)?,
                            pending_count: row.get(2)?,
                            last_analyzed: ts(row, 3)?,
                            dismissed: row.get(4)?,
                        })
                    },
                )
                .optional()
                .map_err(CuratorError::DatabaseError)
            })
            .await
    }

    /// Mark the library's suggestion dismissed; false when there is none
    pub async fn dismiss(&self, library_id: &str) -> Result<bool> {
        let library_id = library_id.to_string();
        self.db
            .execute(move |conn| {
                let n = conn
                    .execute(
                        "UPDATE pattern_suggestions SET dismissed = 1 WHERE library_id = ?",
                        [&library_id],
                    )
                    .map_err(CuratorError::DatabaseError)?;
                Ok(n > 0)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Scheduled tasks
// ---------------------------------------------------------------------------

const TASK_COLUMNS: &str = "id, name, task_type, library_id, interval_minutes, enabled, next_run_at, \
     last_run_at, run_count, last_result, created_at";

fn row_to_task(row: &Row) -> rusqlite::Result<ScheduledTask> {
    Ok(ScheduledTask {
        id: row.get(0)?,
        name: row.get(1)?,
        task_type: row.get(2)?,
        library_id: row.get(3)?,
        interval_minutes: row.get(4)?,
        enabled: row.get(5)?,
        next_run_at: opt_ts(row, 6)?,
        last_run_at: opt_ts(row, 7)?,
        run_count: row.get(8)?,
        last_result: opt_json_col(row, 9)?,
        created_at: ts(row, 10)?,
    })
}

/// Repository for scheduled tasks
pub struct ScheduledTaskRepository {
    db: Arc<DatabaseManager>,
}

impl ScheduledTaskRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Enabled tasks with `next_run_at` not after `now`, plus never-run tasks with
    /// `next_run_at` unset. Unset sorts first, then earliest. A one-shot task that
    /// has run keeps `next_run_at` unset and is not picked up again.
    pub async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledTask>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM scheduled_tasks \
                         WHERE enabled = 1 AND ((next_run_at IS NULL AND last_run_at IS NULL) OR next_run_at <= ?) \
                         ORDER BY next_run_at ASC, created_at ASC LIMIT ?",
                        TASK_COLUMNS
                    ))
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map(params![format_timestamp(&now), limit as i64], row_to_task)
                    .map_err(CuratorError::DatabaseError)?;
                collect_rows(rows)
            })
            .await
    }

    /// Post-execution bookkeeping; `run_count` is incremented in SQL
    pub async fn record_run(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
        last_result: &serde_json::Value,
    ) -> Result<()> {
        let id = id.to_string();
        let result = serde_json::to_string(last_result)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE scheduled_tasks SET last_run_at = ?, next_run_at = ?, \
                     run_count = run_count + 1, last_result = ? WHERE id = ?",
                    params![
                        format_timestamp(&last_run_at),
                        next_run_at.as_ref().map(format_timestamp),
                        result,
                        id,
                    ],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl Repository<ScheduledTask> for ScheduledTaskRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM scheduled_tasks WHERE id = ?", TASK_COLUMNS),
                    [&id],
                    row_to_task,
                )
                .optional()
                .map_err(CuratorError::DatabaseError)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<ScheduledTask>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM scheduled_tasks ORDER BY created_at",
                        TASK_COLUMNS
                    ))
                    .map_err(CuratorError::DatabaseError)?;
                let rows = stmt
                    .query_map([], row_to_task)
                    .map_err(CuratorError::DatabaseError)?;
                collect_rows(rows)
            })
            .await
    }

    async fn create(&self, entity: &ScheduledTask) -> Result<()> {
        let t = entity.clone();
        let last_result = t.last_result.as_ref().map(serde_json::to_string).transpose()?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO scheduled_tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        TASK_COLUMNS
                    ),
                    params![
                        t.id,
                        t.name,
                        t.task_type,
                        t.library_id,
                        t.interval_minutes,
                        t.enabled,
                        t.next_run_at.as_ref().map(format_timestamp),
                        t.last_run_at.as_ref().map(format_timestamp),
                        t.run_count,
                        last_result,
                        format_timestamp(&t.created_at),
                    ],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    /// Update the user-editable fields
    async fn update(&self, entity: &ScheduledTask) -> Result<()> {
        let t = entity.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE scheduled_tasks SET name = ?, interval_minutes = ?, enabled = ?, next_run_at = ? \
                     WHERE id = ?",
                    params![
                        t.name,
                        t.interval_minutes,
                        t.enabled,
                        t.next_run_at.as_ref().map(format_timestamp),
                        t.id,
                    ],
                )
                .map_err(CuratorError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let n = conn
                    .execute("DELETE FROM scheduled_tasks WHERE id = ?", [&id])
                    .map_err(CuratorError::DatabaseError)?;
                Ok(n > 0)
            })
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::*;
    use super::*;
    use crate::core::content_type::build_metadata;
    use chrono::Duration;
    use serde_json::json;

    fn sample_item(external_id: &str, hash: &str) -> CatalogItem {
        CatalogItem {
            server_id: "conn".to_string(),
            external_id: external_id.to_string(),
            library_id: "lib".to_string(),
            tmdb_id: Some("603".to_string()),
            imdb_id: None,
            tvdb_id: None,
            title: "The Matrix".to_string(),
            year: Some(1999),
            media_type: "movie".to_string(),
            genres: vec!["Action".to_string()],
            tags: vec![],
            collections: vec!["Matrix Collection".to_string()],
            studio: Some("Warner Bros.".to_string()),
            content_rating: Some("R".to_string()),
            metadata: build_metadata(json!({"ratingKey": external_id}), None),
            content_hash: hash.to_string(),
            last_synced: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_outcomes() {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        let repo = CatalogItemRepository::new(db);

        assert_eq!(repo.upsert(&sample_item("1", "h1")).await.unwrap(), UpsertOutcome::Added);
        assert_eq!(
            repo.upsert(&sample_item("1", "h1")).await.unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(repo.upsert(&sample_item("1", "h2")).await.unwrap(), UpsertOutcome::Updated);

        let stored = repo.find("conn", "1").await.unwrap().unwrap();
        assert_eq!(stored.content_hash, "h2");
        assert_eq!(stored.genres, vec!["Action".to_string()]);
        assert_eq!(stored.metadata["raw"]["ratingKey"], "1");
    }

    #[tokio::test]
    async fn test_delete_stale_only_touches_library() {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        let repo = CatalogItemRepository::new(db);
        let cutoff = Utc::now();

        let mut old = sample_item("old", "h");
        old.last_synced = cutoff - Duration::minutes(5);
        let mut other = sample_item("other", "h");
        other.library_id = "other-lib".to_string();
        other.last_synced = cutoff - Duration::minutes(5);
        let mut fresh = sample_item("fresh", "h");
        fresh.last_synced = cutoff + Duration::seconds(1);
        for i in [&old, &other, &fresh] {
            repo.upsert(i).await.unwrap();
        }

        assert_eq!(repo.delete_stale("lib", cutoff).await.unwrap(), 1);
        assert!(repo.find("conn", "old").await.unwrap().is_none());
        assert!(repo.find("conn", "other").await.unwrap().is_some());
        let (total, page) = repo.list_by_library("lib", 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].external_id, "fresh");
    }

    #[tokio::test]
    async fn test_activate_keeps_single_active_connection() {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        insert_connection(&db, "a").await;
        insert_connection(&db, "b").await;
        let repo = ProviderConnectionRepository::new(db);

        repo.activate("a").await.unwrap();
        repo.activate("b").await.unwrap();
        assert_eq!(repo.find_active().await.unwrap().unwrap().id, "b");
        assert!(!repo.find_by_id("a").await.unwrap().unwrap().active);

        assert!(matches!(
            repo.activate("missing").await,
            Err(CuratorError::NotFound(_))
        ));
        // failed activation rolled back
        assert_eq!(repo.find_active().await.unwrap().unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_find_due_orders_unset_first() {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        let repo = ScheduledTaskRepository::new(db);
        let now = Utc::now();

        let task = |id: &str, next: Option<DateTime<Utc>>, enabled: bool| ScheduledTask {
            id: id.to_string(),
            name: id.to_string(),
            task_type: "library_sync".to_string(),
            library_id: None,
            interval_minutes: Some(5),
            enabled,
            next_run_at: next,
            last_run_at: None,
            run_count: 0,
            last_result: None,
            created_at: now,
        };
        repo.create(&task("later", Some(now + Duration::minutes(1)), true)).await.unwrap();
        repo.create(&task("past", Some(now - Duration::minutes(1)), true)).await.unwrap();
        repo.create(&task("unset", None, true)).await.unwrap();
        repo.create(&task("disabled", None, false)).await.unwrap();

        let due: Vec<String> = repo
            .find_due(now, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(due, vec!["unset", "past"]);

        repo.record_run("past", now, None, &json!({"success": true})).await.unwrap();
        let stored = repo.find_by_id("past").await.unwrap().unwrap();
        assert_eq!(stored.run_count, 1);
        assert_eq!(stored.next_run_at, None);
        assert_eq!(stored.last_result, Some(json!({"success": true})));

        // Ran once without an interval: no longer due
        let due = repo.find_due(now + Duration::minutes(5), 10).await.unwrap();
        assert!(due.iter().all(|t| t.id != "past"));
    }
}

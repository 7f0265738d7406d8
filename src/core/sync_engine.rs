//! Catalog sync engine
//!
//! Pages through a library on its provider and mirrors every item into
//! `catalog_items`, recording progress on a [`SyncRun`]. Paging is strictly
//! sequential; a page shorter than the batch size ends the run.

use crate::core::clock::Clock;
use crate::core::content_type::{build_metadata, detect_content_type};
use crate::core::crypto::CredentialCipher;
use crate::core::error::{CuratorError, Result};
use crate::db::models::{CatalogItem, Collection, Library, SyncKind, SyncRun, SyncStatus};
use crate::db::repository::{
    CatalogItemRepository, CollectionRepository, LibraryRepository, ProviderConnectionRepository,
    Repository, SyncRunRepository, UpsertOutcome,
};
use crate::provider::{CatalogProvider, Page, ProviderItem, ProviderRegistry};
use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub incremental: bool,
    pub batch_size: usize,
}

/// Resolved provider endpoint for one run
struct SyncTarget {
    provider: Arc<dyn CatalogProvider>,
    server_id: String,
    url: String,
    credential: String,
}

pub struct SyncEngine {
    libraries: Arc<LibraryRepository>,
    connections: Arc<ProviderConnectionRepository>,
    items: Arc<CatalogItemRepository>,
    collections: Arc<CollectionRepository>,
    runs: Arc<SyncRunRepository>,
    registry: Arc<ProviderRegistry>,
    cipher: Arc<CredentialCipher>,
    clock: Arc<dyn Clock>,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        libraries: Arc<LibraryRepository>,
        connections: Arc<ProviderConnectionRepository>,
        items: Arc<CatalogItemRepository>,
        collections: Arc<CollectionRepository>,
        runs: Arc<SyncRunRepository>,
        registry: Arc<ProviderRegistry>,
        cipher: Arc<CredentialCipher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            libraries,
            connections,
            items,
            collections,
            runs,
            registry,
            cipher,
            clock,
        }
    }

    /// Sync one library and return the finished run.
    ///
    /// A failing page fetch marks the run failed and is returned as a
    /// `ProviderError`; per-item failures are only counted.
    pub async fn sync_library(&self, library_id: &str, options: SyncOptions) -> Result<SyncRun> {
        if options.batch_size == 0 {
            return Err(CuratorError::ValidationError(
                "batch size must be greater than zero".to_string(),
            ));
        }

        let library = self
            .libraries
            .find_by_id(library_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("Library {} not found", library_id)))?;
        if !library.enabled {
            return Err(CuratorError::ValidationError(format!(
                "Library {} is disabled",
                library_id
            )));
        }
        let target = self.resolve_target(&library).await?;

        let started_at = self.clock.now();
        let mut run = SyncRun {
            id: Uuid::new_v4().to_string(),
            library_id: library.id.clone(),
            kind: if options.incremental {
                SyncKind::Incremental
            } else {
                SyncKind::Full
            },
            status: SyncStatus::InProgress,
            items_processed: 0,
            items_added: 0,
            items_updated: 0,
            items_failed: 0,
            items_removed: 0,
            error: None,
            started_at,
            completed_at: None,
        };
        self.runs.create(&run).await?;

        info!(
            library_id = %library.id,
            run_id = %run.id,
            kind = run.kind.as_str(),
            batch_size = options.batch_size,
            "Starting library sync"
        );

        if let Err(e) = self.sync_pages(&library, &target, &mut run, options.batch_size).await {
            return Err(self.fail_run(&mut run, e).await);
        }

        self.sync_collections(&library, &target).await;

        if !options.incremental && run.items_failed > 0 {
            // A failed item keeps its old last_synced and would look stale
            warn!(
                library_id = %library.id,
                run_id = %run.id,
                failed = run.items_failed,
                "Skipping prune after item failures"
            );
        } else if !options.incremental {
            match self.items.delete_stale(&library.id, started_at).await {
                Ok(removed) => run.items_removed = removed as i64,
                Err(e) => return Err(self.fail_run(&mut run, e).await),
            }
        }

        let finished_at = self.clock.now();
        run.status = SyncStatus::Completed;
        run.completed_at = Some(finished_at);
        self.runs.update(&run).await?;
        self.libraries
            .update_last_synced(&library.id, finished_at)
            .await?;

        info!(
            library_id = %library.id,
            run_id = %run.id,
            processed = run.items_processed,
            added = run.items_added,
            updated = run.items_updated,
            failed = run.items_failed,
            removed = run.items_removed,
            "Library sync completed"
        );
        Ok(run)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<SyncRun> {
        self.runs
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("Sync run {} not found", run_id)))
    }

    pub async fn list_runs(&self, library_id: &str, limit: usize) -> Result<Vec<SyncRun>> {
        self.runs.find_by_library(library_id, limit).await
    }

    async fn resolve_target(&self, library: &Library) -> Result<SyncTarget> {
        let connection = self
            .connections
            .find_by_id(&library.provider_connection_id)
            .await?
            .ok_or_else(|| {
                CuratorError::NotFound(format!(
                    "Provider connection {} not found",
                    library.provider_connection_id
                ))
            })?;
        if !connection.active {
            return Err(CuratorError::ValidationError(format!(
                "Provider connection {} is not active",
                connection.id
            )));
        }

        Ok(SyncTarget {
            provider: self.registry.get(connection.provider_type)?,
            credential: self.cipher.decrypt(&connection.credential)?,
            server_id: connection.id,
            url: connection.url,
        })
    }

    async fn sync_pages(
        &self,
        library: &Library,
        target: &SyncTarget,
        run: &mut SyncRun,
        batch_size: usize,
    ) -> Result<()> {
        let mut offset = 0;
        loop {
            let page = target
                .provider
                .get_library_items(
                    &target.url,
                    &target.credential,
                    &library.external_id,
                    Page {
                        offset,
                        limit: batch_size,
                    },
                )
                .await
                .map_err(|e| match e {
                    CuratorError::ProviderError(_) => e,
                    other => CuratorError::ProviderError(other.to_string()),
                })?;

            debug!(
                library_id = %library.id,
                offset,
                received = page.received,
                "Fetched catalog page"
            );

            let seen_at = self.clock.now();
            for item in &page.items {
                run.items_processed += 1;
                match self.store_item(library, &target.server_id, item, seen_at).await {
                    Ok(UpsertOutcome::Added) => run.items_added += 1,
                    Ok(UpsertOutcome::Updated) => run.items_updated += 1,
                    Ok(UpsertOutcome::Unchanged) => {}
                    Err(e) => {
                        run.items_failed += 1;
                        warn!(
                            library_id = %library.id,
                            external_id = %item.external_id,
                            error = %e,
                            "Failed to sync catalog item"
                        );
                    }
                }
            }

            self.runs.update(run).await?;

            if page.is_last(batch_size) {
                return Ok(());
            }
            offset += page.received;
        }
    }

    async fn store_item(
        &self,
        library: &Library,
        server_id: &str,
        item: &ProviderItem,
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let catalog_item = to_catalog_item(library, server_id, item, seen_at)?;
        self.items.upsert(&catalog_item).await
    }

    /// Collections are informational; a failure never fails the run
    async fn sync_collections(&self, library: &Library, target: &SyncTarget) {
        let collections = match target
            .provider
            .get_collections(&target.url, &target.credential, &library.external_id)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(library_id = %library.id, error = %e, "Collection sync failed");
                return;
            }
        };

        let now = self.clock.now();
        for c in collections {
            let collection = Collection {
                server_id: target.server_id.clone(),
                external_id: c.external_id,
                library_id: library.id.clone(),
                name: c.name,
                item_count: c.item_count,
                metadata: c.raw,
                last_synced: now,
            };
            if let Err(e) = self.collections.upsert(&collection).await {
                warn!(
                    library_id = %library.id,
                    external_id = %collection.external_id,
                    error = %e,
                    "Failed to store collection"
                );
            }
        }
    }

    /// Mark the run failed; the original error is handed back for the caller
    async fn fail_run(&self, run: &mut SyncRun, error: CuratorError) -> CuratorError {
        run.status = SyncStatus::Failed;
        run.error = Some(error.to_string());
        run.completed_at = Some(self.clock.now());
        if let Err(e) = self.runs.update(run).await {
            warn!(run_id = %run.id, error = %e, "Failed to record sync failure");
        }
        warn!(
            library_id = %run.library_id,
            run_id = %run.id,
            error = %error,
            "Library sync failed"
        );
        error
    }
}

/// Convert a provider record into a mirror row
pub fn to_catalog_item(
    library: &Library,
    server_id: &str,
    item: &ProviderItem,
    seen_at: DateTime<Utc>,
) -> Result<CatalogItem> {
    if item.external_id.trim().is_empty() {
        return Err(CuratorError::ValidationError(
            "item has no external id".to_string(),
        ));
    }
    if item.title.trim().is_empty() {
        return Err(CuratorError::ValidationError(format!(
            "item {} has no title",
            item.external_id
        )));
    }

    let content_type = detect_content_type(&item.title, &item.genres, &item.tags, &item.collections);

    Ok(CatalogItem {
        server_id: server_id.to_string(),
        external_id: item.external_id.clone(),
        library_id: library.id.clone(),
        tmdb_id: item.tmdb_id.clone(),
        imdb_id: item.imdb_id.clone(),
        tvdb_id: item.tvdb_id.clone(),
        title: item.title.clone(),
        year: item.year,
        media_type: item.media_type.clone(),
        genres: item.genres.clone(),
        tags: item.tags.clone(),
        collections: item.collections.clone(),
        studio: item.studio.clone(),
        content_rating: item.content_rating.clone(),
        metadata: build_metadata(item.raw.clone(), content_type),
        content_hash: content_hash(item)?,
        last_synced: seen_at,
    })
}

/// SHA-256 over the mapped fields. The raw record is left out because
/// providers bump view counters and timestamps on every read.
pub fn content_hash(item: &ProviderItem) -> Result<String> {
    let canonical = json!([
        item.title,
        item.year,
        item.media_type,
        item.tmdb_id,
        item.imdb_id,
        item.tvdb_id,
        item.genres,
        item.tags,
        item.collections,
        item.studio,
        item.content_rating,
    ]);
    let digest = Sha256::digest(serde_json::to_vec(&canonical)?);
    Ok(format!("{:x}", digest))
}

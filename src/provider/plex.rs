//! Plex Media Server adapter

use super::{
    endpoint, get_json, id_string, non_empty, CatalogProvider, ConnectionTest, ItemPage, Page,
    ProviderCollection, ProviderItem,
};
use crate::core::error::Result;
use crate::db::models::ProviderType;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

pub struct PlexProvider {
    client: reqwest::Client,
}

impl PlexProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// `MediaContainer.Metadata` of a Plex response, or an empty slice
fn metadata_entries(body: &Value) -> &[Value] {
    body.pointer("/MediaContainer/Metadata")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// `[{tag: ..}]` lists such as Genre, Label, Collection
fn tags(record: &Value, key: &str) -> Vec<String> {
    record
        .get(key)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| non_empty(e.get("tag")))
                .collect()
        })
        .unwrap_or_default()
}

/// Map one Plex metadata record; records without ratingKey or title are dropped
pub fn map_item(record: &Value) -> Option<ProviderItem> {
    let Some(external_id) = id_string(record.get("ratingKey")) else {
        debug!("Skipping Plex record without ratingKey");
        return None;
    };
    let Some(title) = non_empty(record.get("title")) else {
        debug!(external_id = %external_id, "Skipping Plex record without title");
        return None;
    };

    let mut item = ProviderItem {
        external_id,
        title,
        year: record.get("year").and_then(Value::as_i64),
        media_type: non_empty(record.get("type")).unwrap_or_else(|| "movie".to_string()),
        tmdb_id: None,
        imdb_id: None,
        tvdb_id: None,
        genres: tags(record, "Genre"),
        tags: tags(record, "Label"),
        collections: tags(record, "Collection"),
        studio: non_empty(record.get("studio")),
        content_rating: non_empty(record.get("contentRating")),
        raw: record.clone(),
    };

    let guids = record
        .get("Guid")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for guid in guids.iter().filter_map(|g| g.get("id").and_then(Value::as_str)) {
        if let Some(id) = guid.strip_prefix("tmdb://") {
            item.tmdb_id = Some(id.to_string());
        } else if let Some(id) = guid.strip_prefix("imdb://") {
            item.imdb_id = Some(id.to_string());
        } else if let Some(id) = guid.strip_prefix("tvdb://") {
            item.tvdb_id = Some(id.to_string());
        }
    }

    Some(item)
}

pub fn map_collection(record: &Value) -> Option<ProviderCollection> {
    let external_id = id_string(record.get("ratingKey"))?;
    let name = non_empty(record.get("title"))?;
    Some(ProviderCollection {
        external_id,
        name,
        item_count: record
            .get("childCount")
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0),
        raw: record.clone(),
    })
}

#[async_trait]
impl CatalogProvider for PlexProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Plex
    }

    async fn test_connection(&self, url: &str, credential: &str) -> ConnectionTest {
        let target = match endpoint(url, "identity", &[]) {
            Ok(u) => u,
            Err(e) => return ConnectionTest::failure(e.to_string()),
        };
        match get_json(&self.client, target, &[("X-Plex-Token", credential)]).await {
            Ok(body) => {
                let container = body.get("MediaContainer").cloned().unwrap_or(Value::Null);
                ConnectionTest::success(json!({
                    "machineIdentifier": container.get("machineIdentifier"),
                    "version": container.get("version"),
                }))
            }
            Err(e) => ConnectionTest::failure(e.to_string()),
        }
    }

    #[instrument(skip(self, credential), fields(provider = "plex"))]
    async fn get_library_items(
        &self,
        url: &str,
        credential: &str,
        external_library_id: &str,
        page: Page,
    ) -> Result<ItemPage> {
        let target = endpoint(
            url,
            &format!("library/sections/{}/all", external_library_id),
            &[("includeGuids", "1".to_string())],
        )?;
        let start = page.offset.to_string();
        let size = page.limit.to_string();
        let body = get_json(
            &self.client,
            target,
            &[
                ("X-Plex-Token", credential),
                ("X-Plex-Container-Start", start.as_str()),
                ("X-Plex-Container-Size", size.as_str()),
            ],
        )
        .await?;

        let entries = metadata_entries(&body);
        Ok(ItemPage {
            items: entries.iter().filter_map(map_item).collect(),
            received: entries.len(),
        })
    }

    async fn get_collections(
        &self,
        url: &str,
        credential: &str,
        external_library_id: &str,
    ) -> Result<Vec<ProviderCollection>> {
        let target = endpoint(
            url,
            &format!("library/sections/{}/collections", external_library_id),
            &[],
        )?;
        let body = get_json(&self.client, target, &[("X-Plex-Token", credential)]).await?;
        Ok(metadata_entries(&body)
            .iter()
            .filter_map(map_collection)
            .collect())
    }
}

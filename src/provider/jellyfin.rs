//! Jellyfin and Emby adapter
//!
//! Both servers expose the same media-browser API (`/System/Info`, `/Items`)
//! and accept the token in `X-Emby-Token`, so one implementation serves both
//! provider types.

use super::{
    endpoint, get_json, id_string, non_empty, CatalogProvider, ConnectionTest, ItemPage, Page,
    ProviderCollection, ProviderItem,
};
use crate::core::error::Result;
use crate::db::models::ProviderType;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

const ITEM_FIELDS: &str = "Genres,Tags,Studios,OfficialRating,ProviderIds,ProductionYear";
const ITEM_TYPES: &str = "Movie,Series";

pub struct MediaBrowserProvider {
    client: reqwest::Client,
    flavor: ProviderType,
}

impl MediaBrowserProvider {
    pub fn new(client: reqwest::Client, flavor: ProviderType) -> Self {
        Self { client, flavor }
    }
}

fn items(body: &Value) -> &[Value] {
    body.get("Items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn string_list(record: &Value, key: &str) -> Vec<String> {
    record
        .get(key)
        .and_then(Value::as_array)
        .map(|v| v.iter().filter_map(|s| non_empty(Some(s))).collect())
        .unwrap_or_default()
}

/// Provider ids are keyed case-insensitively across server versions
fn provider_id(record: &Value, key: &str) -> Option<String> {
    record
        .get("ProviderIds")
        .and_then(Value::as_object)?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .and_then(|(_, v)| id_string(Some(v)))
}

fn media_type(kind: Option<&str>) -> String {
    match kind {
        Some("Movie") | None => "movie".to_string(),
        Some("Series") => "show".to_string(),
        Some(other) => other.to_ascii_lowercase(),
    }
}

/// Map one `/Items` record; records without Id or Name are dropped
pub fn map_item(record: &Value) -> Option<ProviderItem> {
    let Some(external_id) = id_string(record.get("Id")) else {
        debug!("Skipping media-browser record without Id");
        return None;
    };
    let Some(title) = non_empty(record.get("Name")) else {
        debug!(external_id = %external_id, "Skipping media-browser record without Name");
        return None;
    };

    let studio = record
        .get("Studios")
        .and_then(Value::as_array)
        .and_then(|s| s.first())
        .and_then(|s| non_empty(s.get("Name")));

    Some(ProviderItem {
        external_id,
        title,
        year: record.get("ProductionYear").and_then(Value::as_i64),
        media_type: media_type(record.get("Type").and_then(Value::as_str)),
        tmdb_id: provider_id(record, "Tmdb"),
        imdb_id: provider_id(record, "Imdb"),
        tvdb_id: provider_id(record, "Tvdb"),
        genres: string_list(record, "Genres"),
        tags: string_list(record, "Tags"),
        collections: Vec::new(),
        studio,
        content_rating: non_empty(record.get("OfficialRating")),
        raw: record.clone(),
    })
}

pub fn map_collection(record: &Value) -> Option<ProviderCollection> {
    Some(ProviderCollection {
        external_id: id_string(record.get("Id"))?,
        name: non_empty(record.get("Name"))?,
        item_count: record.get("ChildCount").and_then(Value::as_i64).unwrap_or(0),
        raw: record.clone(),
    })
}

#[async_trait]
impl CatalogProvider for MediaBrowserProvider {
    fn provider_type(&self) -> ProviderType {
        self.flavor
    }

    async fn test_connection(&self, url: &str, credential: &str) -> ConnectionTest {
        let target = match endpoint(url, "System/Info", &[]) {
            Ok(u) => u,
            Err(e) => return ConnectionTest::failure(e.to_string()),
        };
        match get_json(&self.client, target, &[("X-Emby-Token", credential)]).await {
            Ok(body) => ConnectionTest::success(json!({
                "serverName": body.get("ServerName"),
                "version": body.get("Version"),
                "id": body.get("Id"),
            })),
            Err(e) => ConnectionTest::failure(e.to_string()),
        }
    }

    #[instrument(skip(self, credential))]
    async fn get_library_items(
        &self,
        url: &str,
        credential: &str,
        external_library_id: &str,
        page: Page,
    ) -> Result<ItemPage> {
        let target = endpoint(
            url,
            "Items",
            &[
                ("ParentId", external_library_id.to_string()),
                ("Recursive", "true".to_string()),
                ("IncludeItemTypes", ITEM_TYPES.to_string()),
                ("Fields", ITEM_FIELDS.to_string()),
                ("SortBy", "SortName".to_string()),
                ("StartIndex", page.offset.to_string()),
                ("Limit", page.limit.to_string()),
            ],
        )?;
        let body = get_json(&self.client, target, &[("X-Emby-Token", credential)]).await?;

        let records = items(&body);
        Ok(ItemPage {
            items: records.iter().filter_map(map_item).collect(),
            received: records.len(),
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
            "Items",
            &[
                ("ParentId", external_library_id.to_string()),
                ("Recursive", "true".to_string()),
                ("IncludeItemTypes", "BoxSet".to_string()),
                ("Fields", "ChildCount".to_string()),
            ],
        )?;
        let body = get_json(&self.client, target, &[("X-Emby-Token", credential)]).await?;
        Ok(items(&body).iter().filter_map(map_collection).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_item() {
        let record = json!({
            "Id": "a1b2",
            "Name": "Spirited Away",
            "ProductionYear": 2001,
            "Type": "Movie",
            "Genres": ["Animation", "Anime", ""],
            "Tags": ["ghibli"],
            "Studios": [{"Name": "Studio Ghibli", "Id": "s1"}],
            "OfficialRating": "PG",
            "ProviderIds": {"Tmdb": "129", "imdb": "tt0245429"}
        });

        let item = map_item(&record).unwrap();
        assert_eq!(item.external_id, "a1b2");
        assert_eq!(item.media_type, "movie");
        assert_eq!(item.genres, vec!["Animation", "Anime"]);
        assert_eq!(item.studio.as_deref(), Some("Studio Ghibli"));
        assert_eq!(item.content_rating.as_deref(), Some("PG"));
        assert_eq!(item.tmdb_id.as_deref(), Some("129"));
        assert_eq!(item.imdb_id.as_deref(), Some("tt0245429"));
        assert_eq!(item.tvdb_id, None);
    }

    #[test]
    fn test_series_and_missing_fields() {
        let item = map_item(&json!({"Id": "s", "Name": "Bluey", "Type": "Series"})).unwrap();
        assert_eq!(item.media_type, "show");
        assert!(item.genres.is_empty());
        assert_eq!(item.year, None);

        assert!(map_item(&json!({"Name": "No id"})).is_none());
        assert!(map_item(&json!({"Id": "x"})).is_none());
    }

    #[test]
    fn test_collections() {
        let body = json!({
            "Items": [
                {"Id": "b1", "Name": "Alien Collection", "ChildCount": 4},
                {"Id": "b2"}
            ],
            "TotalRecordCount": 2
        });
        let collections: Vec<_> = items(&body).iter().filter_map(map_collection).collect();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].name, "Alien Collection");
        assert_eq!(collections[0].item_count, 4);
        assert!(items(&json!({})).is_empty());
    }
}

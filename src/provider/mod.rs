//! Catalog provider adapters
//!
//! A uniform, stateless paging interface over media-server catalog APIs. One
//! adapter per provider type, looked up through [`ProviderRegistry`].
//!
//! Paging contract: callers pass `{offset, limit}`; a page with fewer than
//! `limit` records (including an empty page) marks the end of the data.

pub mod jellyfin;
pub mod plex;

use crate::core::error::{CuratorError, Result};
use crate::db::models::ProviderType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use jellyfin::MediaBrowserProvider;
pub use plex::PlexProvider;

/// One catalog record as reported by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderItem {
    pub external_id: String,
    pub title: String,
    pub year: Option<i64>,
    pub media_type: String,
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub collections: Vec<String>,
    pub studio: Option<String>,
    pub content_rating: Option<String>,
    /// The provider's record as received
    #[serde(default)]
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCollection {
    pub external_id: String,
    pub name: String,
    pub item_count: i64,
    #[serde(default)]
    pub raw: Value,
}

/// Result of a connectivity probe; transport failures land in `error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTest {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionTest {
    pub fn success(server_info: Value) -> Self {
        Self {
            ok: true,
            server_info: Some(server_info),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            server_info: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

/// One page of mapped items. `received` counts the records the server sent,
/// including ones dropped during mapping, and alone decides end-of-data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    pub items: Vec<ProviderItem>,
    pub received: usize,
}

impl ItemPage {
    /// Every record mapped cleanly
    pub fn complete(items: Vec<ProviderItem>) -> Self {
        let received = items.len();
        Self { items, received }
    }

    pub fn is_last(&self, limit: usize) -> bool {
        self.received < limit
    }
}

/// Capability set every media-server adapter provides
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    async fn test_connection(&self, url: &str, credential: &str) -> ConnectionTest;

    async fn get_library_items(
        &self,
        url: &str,
        credential: &str,
        external_library_id: &str,
        page: Page,
    ) -> Result<ItemPage>;

    async fn get_collections(
        &self,
        url: &str,
        credential: &str,
        external_library_id: &str,
    ) -> Result<Vec<ProviderCollection>>;
}

/// Provider type -> adapter
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderType, Arc<dyn CatalogProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in Plex, Jellyfin and Emby adapters
    pub fn with_defaults(request_timeout: Duration) -> Result<Self> {
        let client = build_client(request_timeout)?;
        let mut registry = Self::new();
        registry.register(Arc::new(PlexProvider::new(client.clone())));
        registry.register(Arc::new(MediaBrowserProvider::new(
            client.clone(),
            ProviderType::Jellyfin,
        )));
        registry.register(Arc::new(MediaBrowserProvider::new(client, ProviderType::Emby)));
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn CatalogProvider>) {
        self.providers.insert(provider.provider_type(), provider);
    }

    pub fn get(&self, provider_type: ProviderType) -> Result<Arc<dyn CatalogProvider>> {
        self.providers.get(&provider_type).cloned().ok_or_else(|| {
            CuratorError::ValidationError(format!(
                "No adapter registered for provider type '{}'",
                provider_type
            ))
        })
    }
}

/// HTTP client shared by the adapters; every request carries the timeout
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|e| CuratorError::InitializationError(format!("HTTP client: {}", e)))
}

/// Join a base URL and path and attach query parameters
pub(crate) fn endpoint(base: &str, path: &str, query: &[(&str, String)]) -> Result<url::Url> {
    let joined = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    url::Url::parse_with_params(&joined, query)
        .map_err(|e| CuratorError::ValidationError(format!("Invalid provider URL '{}': {}", base, e)))
}

/// GET a JSON document; non-success statuses are provider errors
pub(crate) async fn get_json(
    client: &reqwest::Client,
    url: url::Url,
    headers: &[(&str, &str)],
) -> Result<Value> {
    let mut request = client.get(url.clone()).header("Accept", "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CuratorError::ProviderError(format!(
            "GET {} returned HTTP {}",
            url.path(),
            status
        )));
    }
    Ok(response.json::<Value>().await?)
}

/// String or number id as text
pub(crate) fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_lookup() {
        let registry = ProviderRegistry::with_defaults(Duration::from_secs(5)).unwrap();
        assert_eq!(
            registry.get(ProviderType::Emby).unwrap().provider_type(),
            ProviderType::Emby
        );

        let empty = ProviderRegistry::new();
        assert!(matches!(
            empty.get(ProviderType::Plex),
            Err(CuratorError::ValidationError(_))
        ));
    }

    #[test]
    fn test_short_page_is_last() {
        let page = ItemPage {
            items: vec![],
            received: 100,
        };
        assert!(!page.is_last(100));
        assert!(ItemPage::complete(vec![]).is_last(100));
    }

    #[test]
    fn test_endpoint_joins_and_encodes() {
        let url = endpoint(
            "http://plex.local:32400/",
            "/library/sections/1/all",
            &[("includeGuids", "1".to_string())],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "http://plex.local:32400/library/sections/1/all?includeGuids=1"
        );
        assert!(endpoint("not a url", "x", &[]).is_err());
    }

    #[test]
    fn test_id_string() {
        assert_eq!(id_string(Some(&json!(42))), Some("42".to_string()));
        assert_eq!(id_string(Some(&json!("abc"))), Some("abc".to_string()));
        assert_eq!(id_string(Some(&json!(""))), None);
        assert_eq!(id_string(None), None);
    }
}

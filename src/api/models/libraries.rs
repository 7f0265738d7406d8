use crate::core::rule_engine::RuleConditions;
use serde::Deserialize;

/// Request body for registering a library under a provider connection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLibraryRequest {
    pub provider_connection_id: String,
    /// The provider's id for the library (Plex section key, Jellyfin parent id)
    pub external_id: String,
    pub name: String,
    pub media_type: String,
    pub enabled: Option<bool>,
    pub rule_set: Option<RuleConditions>,
}

/// `POST /libraries/:id/sync?full=`
#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    #[serde(default)]
    pub full: bool,
}

/// `GET /libraries/:id/sync-runs?limit=`
#[derive(Debug, Default, Deserialize)]
pub struct SyncRunsQuery {
    pub limit: Option<usize>,
}

use crate::db::models::{ProviderConnection, ProviderType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request body for registering a provider connection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    pub url: String,
    /// Plain-text token; encrypted before it is stored
    pub credential: String,
    /// Make this the active connection right away
    #[serde(default)]
    pub activate: bool,
}

/// Connection as exposed over HTTP; the credential never leaves the server
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResponse {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub url: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<ProviderConnection> for ConnectionResponse {
    fn from(connection: ProviderConnection) -> Self {
        Self {
            id: connection.id,
            name: connection.name,
            provider_type: connection.provider_type,
            url: connection.url,
            active: connection.active,
            created_at: connection.created_at,
        }
    }
}

//! Database models
//!
//! Data structures representing database tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::error::CuratorError;
use crate::core::rule_engine::{Criterion, RuleConditions};

/// Supported media-server provider variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Plex,
    Jellyfin,
    Emby,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Plex => "plex",
            ProviderType::Jellyfin => "jellyfin",
            ProviderType::Emby => "emby",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plex" => Ok(ProviderType::Plex),
            "jellyfin" => Ok(ProviderType::Jellyfin),
            "emby" => Ok(ProviderType::Emby),
            other => Err(CuratorError::ValidationError(format!(
                "Unknown provider type '{}'",
                other
            ))),
        }
    }
}

/// Provider connection record; `credential` is stored encrypted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConnection {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub url: String,
    #[serde(skip_serializing)]
    pub credential: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Library record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Library {
    pub id: String,
    pub provider_connection_id: String,
    /// The provider's own id for this library (Plex section key, Jellyfin parent id)
    pub external_id: String,
    pub name: String,
    pub media_type: String,
    pub enabled: bool,
    /// Condition mapping used for request-time routing
    pub rule_set: Option<RuleConditions>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Mirrored catalog item; natural key is (server_id, external_id)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub server_id: String,
    pub external_id: String,
    pub library_id: String,
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub title: String,
    pub year: Option<i64>,
    pub media_type: String,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub collections: Vec<String>,
    pub studio: Option<String>,
    pub content_rating: Option<String>,
    pub metadata: serde_json::Value,
    pub content_hash: String,
    pub last_synced: DateTime<Utc>,
}

/// Mirrored provider collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub server_id: String,
    pub external_id: String,
    pub library_id: String,
    pub name: String,
    pub item_count: i64,
    pub metadata: serde_json::Value,
    pub last_synced: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Incremental,
    Full,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Incremental => "incremental",
            SyncKind::Full => "full",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "full" => SyncKind::Full,
            _ => SyncKind::Incremental,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    InProgress,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "completed" => SyncStatus::Completed,
            "failed" => SyncStatus::Failed,
            _ => SyncStatus::InProgress,
        }
    }
}

/// One execution of the sync engine against a library
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: String,
    pub library_id: String,
    pub kind: SyncKind,
    pub status: SyncStatus,
    pub items_processed: i64,
    pub items_added: i64,
    pub items_updated: i64,
    pub items_failed: i64,
    pub items_removed: i64,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Persisted classification rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub library_id: String,
    pub name: String,
    pub criteria: Vec<Criterion>,
    pub priority: i64,
    pub enabled: bool,
    pub generated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Latest pattern analysis for a library (one row per library)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternSuggestion {
    pub library_id: String,
    pub detected_patterns: Vec<crate::core::pattern_analyzer::DetectedPattern>,
    pub pending_count: i64,
    pub last_analyzed: DateTime<Utc>,
    pub dismissed: bool,
}

/// Recurring or one-shot background task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub task_type: String,
    pub library_id: Option<String>,
    pub interval_minutes: Option<i64>,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub last_result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

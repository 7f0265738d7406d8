//! Curator Backend Library
//!
//! Mirrors media-server catalogs into SQLite, learns classification rules
//! from the mirrored metadata and routes incoming media requests to the
//! right library.

pub mod api;
pub mod core;
pub mod db;
pub mod provider;

// Re-export commonly used types
pub use api::{ApiServer, AppState};
pub use crate::core::{Config, RuleEngine, Scheduler, SyncEngine};
pub use db::DatabaseManager;
pub use provider::{CatalogProvider, ProviderRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for the library
pub type Result<T> = anyhow::Result<T>;

//! Database module
//!
//! This module provides database management functionality including:
//! - Database connection pool management
//! - Repository pattern implementations
//! - Database migrations
//! - Data models and schemas

pub mod manager;
pub mod migrations;
pub mod models;
pub mod repository;

pub use manager::DatabaseManager;
pub use models::{
    CatalogItem, Collection, Library, PatternSuggestion, ProviderConnection, ProviderType, Rule,
    ScheduledTask, SyncKind, SyncRun, SyncStatus,
};
pub use repository::{
    CatalogItemRepository, CollectionRepository, LibraryRepository, PatternSuggestionRepository,
    ProviderConnectionRepository, Repository, RuleRepository, ScheduledTaskRepository,
    SyncRunRepository, UpsertOutcome,
};

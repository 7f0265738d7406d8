//! Core business logic module
//!
//! This module provides the core application layer including:
//! - Catalog sync and content analysis
//! - Pattern analysis and the rule engine
//! - The conversational rule builder and its chat collaborator
//! - Scheduling of recurring work
//! - Configuration, logging, errors, credential encryption and the clock

pub mod chat;
pub mod clock;
pub mod config;
pub mod content_type;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod pattern_analyzer;
pub mod rule_builder;
pub mod rule_engine;
pub mod scheduler;
pub mod sync_engine;

pub use chat::{ChatClient, ChatMessage, DisabledChatClient, OpenAiChatClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use crypto::CredentialCipher;
pub use error::{CuratorError, ErrorResponse, Result};
pub use logging::Logger;
pub use pattern_analyzer::{AnalyzeOptions, DetectedPattern, PatternAnalysis, PatternAnalyzer};
pub use rule_builder::{RuleBuilder, Session, SessionState};
pub use rule_engine::{Classification, Criterion, RuleConditions, RuleEngine, RulePreview};
pub use scheduler::{Scheduler, TaskRunner, TaskType};
pub use sync_engine::{SyncEngine, SyncOptions};

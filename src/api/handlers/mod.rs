pub mod connections;
pub mod libraries;
pub mod rule_builder;
pub mod rules;
pub mod system;
pub mod tasks;

pub use connections::*;
pub use libraries::*;
pub use rule_builder::*;
pub use rules::*;
pub use system::*;
pub use tasks::*;

use crate::core::chat::ChatClient;
use crate::core::clock::Clock;
use crate::core::config::Config;
use crate::core::crypto::CredentialCipher;
use crate::core::error::{CuratorError, Result};
use crate::core::pattern_analyzer::PatternAnalyzer;
use crate::core::rule_builder::RuleBuilder;
use crate::core::rule_engine::RuleEngine;
use crate::core::scheduler::{AnalysisTaskRunner, Scheduler, SyncTaskRunner, TaskType};
use crate::core::sync_engine::SyncEngine;
use crate::db::manager::DatabaseManager;
use crate::db::repository::{
    CatalogItemRepository, CollectionRepository, LibraryRepository, PatternSuggestionRepository,
    ProviderConnectionRepository, RuleRepository, ScheduledTaskRepository, SyncRunRepository,
};
use crate::provider::ProviderRegistry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<DatabaseManager>,
    pub cipher: Arc<CredentialCipher>,
    pub registry: Arc<ProviderRegistry>,
    pub connection_repo: Arc<ProviderConnectionRepository>,
    pub library_repo: Arc<LibraryRepository>,
    pub item_repo: Arc<CatalogItemRepository>,
    pub sync_engine: Arc<SyncEngine>,
    pub pattern_analyzer: Arc<PatternAnalyzer>,
    pub rule_engine: Arc<RuleEngine>,
    pub rule_builder: Arc<RuleBuilder>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    /// Wire repositories, engines and the scheduler over one database
    pub fn new(
        config: Config,
        db: Arc<DatabaseManager>,
        registry: ProviderRegistry,
        chat: Arc<dyn ChatClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let connection_repo = Arc::new(ProviderConnectionRepository::new(db.clone()));
        let library_repo = Arc::new(LibraryRepository::new(db.clone()));
        let item_repo = Arc::new(CatalogItemRepository::new(db.clone()));
        let collection_repo = Arc::new(CollectionRepository::new(db.clone()));
        let run_repo = Arc::new(SyncRunRepository::new(db.clone()));
        let rule_repo = Arc::new(RuleRepository::new(db.clone()));
        let suggestion_repo = Arc::new(PatternSuggestionRepository::new(db.clone()));
        let task_repo = Arc::new(ScheduledTaskRepository::new(db.clone()));

        let cipher = Arc::new(CredentialCipher::from_secret(&config.security.encryption_secret));
        let registry = Arc::new(registry);

        let sync_engine = Arc::new(SyncEngine::new(
            library_repo.clone(),
            connection_repo.clone(),
            item_repo.clone(),
            collection_repo,
            run_repo,
            registry.clone(),
            cipher.clone(),
            clock.clone(),
        ));
        let pattern_analyzer = Arc::new(PatternAnalyzer::new(
            library_repo.clone(),
            item_repo.clone(),
            suggestion_repo,
            clock.clone(),
        ));
        let rule_engine = Arc::new(RuleEngine::new(
            rule_repo,
            library_repo.clone(),
            item_repo.clone(),
            clock.clone(),
        ));
        let rule_builder = Arc::new(RuleBuilder::new(
            chat,
            library_repo.clone(),
            rule_engine.clone(),
            clock.clone(),
            chrono::Duration::minutes(config.rule_builder.session_ttl_minutes),
        ));

        let batch_size = config.sync.batch_size;
        let scheduler = Arc::new(
            Scheduler::new(
                task_repo,
                clock,
                config.scheduler.batch_limit,
                Duration::from_secs(config.scheduler.poll_interval_secs),
            )
            .with_runner(
                TaskType::LibrarySync,
                Arc::new(SyncTaskRunner::new(sync_engine.clone(), true, batch_size)),
            )
            .with_runner(
                TaskType::FullRescan,
                Arc::new(SyncTaskRunner::new(sync_engine.clone(), false, batch_size)),
            )
            .with_runner(
                TaskType::PatternAnalysis,
                Arc::new(AnalysisTaskRunner::new(pattern_analyzer.clone())),
            ),
        );

        Self {
            config: Arc::new(config),
            db,
            cipher,
            registry,
            connection_repo,
            library_repo,
            item_repo,
            sync_engine,
            pattern_analyzer,
            rule_engine,
            rule_builder,
            scheduler,
        }
    }
}

/// Run long work on its own task; a dropped request (timeout, disconnect)
/// stops waiting for it but cannot cancel it
pub(crate) async fn detached<F, T>(work: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| CuratorError::TaskError(format!("Background work aborted: {}", e)))?
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::api::routes::build_api_routes;
    use crate::core::chat::DisabledChatClient;
    use crate::core::clock::SystemClock;
    use crate::db::models::ProviderType;
    use crate::db::repository::tests_support::insert_library;
    use crate::provider::{
        CatalogProvider, ConnectionTest, ItemPage, Page, ProviderCollection, ProviderItem,
    };
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    pub fn test_state() -> AppState {
        test_state_with(ProviderRegistry::new())
    }

    pub fn test_state_with(registry: ProviderRegistry) -> AppState {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        AppState::new(
            Config::defaults().unwrap(),
            db,
            registry,
            Arc::new(DisabledChatClient),
            Arc::new(SystemClock),
        )
    }

    /// Plex stand-in that takes `delay` to serve its single item
    pub struct SlowProvider {
        pub delay: Duration,
    }

    #[async_trait]
    impl CatalogProvider for SlowProvider {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Plex
        }

        async fn test_connection(&self, _url: &str, _credential: &str) -> ConnectionTest {
            ConnectionTest::success(json!({}))
        }

        async fn get_library_items(
            &self,
            _url: &str,
            _credential: &str,
            _external_library_id: &str,
            _page: Page,
        ) -> Result<ItemPage> {
            tokio::time::sleep(self.delay).await;
            Ok(ItemPage::complete(vec![ProviderItem {
                external_id: "slow-1".to_string(),
                title: "The Long Goodbye".to_string(),
                year: Some(1973),
                media_type: "movie".to_string(),
                tmdb_id: None,
                imdb_id: None,
                tvdb_id: None,
                genres: vec!["Crime".to_string()],
                tags: vec![],
                collections: vec![],
                studio: None,
                content_rating: Some("R".to_string()),
                raw: json!({}),
            }]))
        }

        async fn get_collections(
            &self,
            _url: &str,
            _credential: &str,
            _external_library_id: &str,
        ) -> Result<Vec<ProviderCollection>> {
            Ok(vec![])
        }
    }

    /// State whose only provider is slow, with an active connection and library "lib-1"
    pub async fn slow_state(delay: Duration) -> AppState {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(SlowProvider { delay }));
        let state = test_state_with(registry);

        let (status, connection) = send(
            app(&state),
            Method::POST,
            "/api/v1/connections",
            Some(json!({
                "name": "Slow Plex",
                "type": "plex",
                "url": "http://plex.local:32400",
                "credential": "token",
                "activate": true,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        insert_library(&state.db, connection["id"].as_str().unwrap(), "lib-1").await;
        state
    }

    pub fn app(state: &AppState) -> Router {
        build_api_routes(state.clone())
    }

    /// Send one JSON request and decode the JSON response
    pub async fn send(
        app: Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

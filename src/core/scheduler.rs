//! Scheduler
//!
//! One cooperative poll loop. Every tick fetches the due [`ScheduledTask`]s,
//! dispatches each to the [`TaskRunner`] registered for its type and records
//! the outcome. Task failures never escape a tick: they are captured in the
//! task's `last_result`.

use crate::core::clock::{format_timestamp, Clock};
use crate::core::error::{CuratorError, Result};
use crate::core::pattern_analyzer::{analysis_summary, AnalyzeOptions, PatternAnalyzer};
use crate::core::sync_engine::{SyncEngine, SyncOptions};
use crate::db::models::ScheduledTask;
use crate::db::repository::{Repository, ScheduledTaskRepository};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    LibrarySync,
    FullRescan,
    PatternAnalysis,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::LibrarySync => "library_sync",
            TaskType::FullRescan => "full_rescan",
            TaskType::PatternAnalysis => "pattern_analysis",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "library_sync" | "librarySync" => Ok(TaskType::LibrarySync),
            "full_rescan" | "fullRescan" => Ok(TaskType::FullRescan),
            "pattern_analysis" | "patternAnalysis" => Ok(TaskType::PatternAnalysis),
            other => Err(CuratorError::ValidationError(format!(
                "Unknown task type '{}'",
                other
            ))),
        }
    }
}

/// Work behind one task type
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, library_id: Option<&str>) -> Result<Value>;
}

fn required_library(library_id: Option<&str>) -> Result<&str> {
    library_id.ok_or_else(|| CuratorError::ValidationError("Task has no library".to_string()))
}

/// `library_sync` (incremental) and `full_rescan` (full, with pruning)
pub struct SyncTaskRunner {
    engine: Arc<SyncEngine>,
    incremental: bool,
    batch_size: usize,
}

impl SyncTaskRunner {
    pub fn new(engine: Arc<SyncEngine>, incremental: bool, batch_size: usize) -> Self {
        Self {
            engine,
            incremental,
            batch_size,
        }
    }
}

#[async_trait]
impl TaskRunner for SyncTaskRunner {
    async fn run(&self, library_id: Option<&str>) -> Result<Value> {
        let run = self
            .engine
            .sync_library(
                required_library(library_id)?,
                SyncOptions {
                    incremental: self.incremental,
                    batch_size: self.batch_size,
                },
            )
            .await?;
        Ok(serde_json::to_value(run)?)
    }
}

pub struct AnalysisTaskRunner {
    analyzer: Arc<PatternAnalyzer>,
}

impl AnalysisTaskRunner {
    pub fn new(analyzer: Arc<PatternAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl TaskRunner for AnalysisTaskRunner {
    async fn run(&self, library_id: Option<&str>) -> Result<Value> {
        let analysis = self
            .analyzer
            .analyze_library(required_library(library_id)?, AnalyzeOptions::default())
            .await?;
        Ok(analysis_summary(&analysis))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub name: String,
    pub task_type: String,
    pub library_id: Option<String>,
    pub interval_minutes: Option<i64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub interval_minutes: Option<i64>,
    pub enabled: Option<bool>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// 366 days
pub const MAX_INTERVAL_MINUTES: i64 = 60 * 24 * 366;

fn validate_interval(interval: Option<i64>) -> Result<()> {
    match interval {
        Some(m) if m <= 0 => Err(CuratorError::ValidationError(
            "intervalMinutes must be greater than 0".to_string(),
        )),
        Some(m) if m > MAX_INTERVAL_MINUTES => Err(CuratorError::ValidationError(format!(
            "intervalMinutes must be at most {}",
            MAX_INTERVAL_MINUTES
        ))),
        _ => Ok(()),
    }
}

/// `None` when the interval does not fit the calendar
fn next_run_after(finished_at: DateTime<Utc>, interval_minutes: i64) -> Option<DateTime<Utc>> {
    Duration::try_minutes(interval_minutes).and_then(|d| finished_at.checked_add_signed(d))
}

/// Clears the poll-in-progress flag when a tick ends, however it ends
struct PollGuard<'a>(&'a AtomicBool);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Scheduler {
    tasks: Arc<ScheduledTaskRepository>,
    runners: HashMap<TaskType, Arc<dyn TaskRunner>>,
    clock: Arc<dyn Clock>,
    batch_limit: usize,
    poll_interval: std::time::Duration,
    polling: AtomicBool,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: RwLock<mpsc::Receiver<()>>,
}

impl Scheduler {
    pub fn new(
        tasks: Arc<ScheduledTaskRepository>,
        clock: Arc<dyn Clock>,
        batch_limit: usize,
        poll_interval: std::time::Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            tasks,
            runners: HashMap::new(),
            clock,
            batch_limit,
            poll_interval,
            polling: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx: RwLock::new(shutdown_rx),
        }
    }

    pub fn with_runner(mut self, task_type: TaskType, runner: Arc<dyn TaskRunner>) -> Self {
        self.runners.insert(task_type, runner);
        self
    }

    /// Poll until [`Scheduler::shutdown`]; a tick in flight is allowed to finish
    pub async fn start(self: Arc<Self>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            batch_limit = self.batch_limit,
            "Scheduler started"
        );

        let mut shutdown_rx = {
            let mut guard = self.shutdown_rx.write().await;
            std::mem::replace(&mut *guard, mpsc::channel(1).1)
        };
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Scheduler tick failed");
                    }
                }
            }
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Run every due task once; returns how many ran
    pub async fn tick(&self) -> Result<usize> {
        if self.polling.swap(true, Ordering::SeqCst) {
            debug!("Previous poll still running; skipping tick");
            return Ok(0);
        }
        let _guard = PollGuard(&self.polling);

        let due = self.tasks.find_due(self.clock.now(), self.batch_limit).await?;
        if !due.is_empty() {
            debug!(count = due.len(), "Due tasks found");
        }

        let mut executed = 0;
        for task in &due {
            match self.execute(task).await {
                Ok(()) => executed += 1,
                Err(e) => error!(task_id = %task.id, error = %e, "Failed to record task run"),
            }
        }
        Ok(executed)
    }

    /// Execute a task now, outside the poll cadence, with the same bookkeeping
    pub async fn run_now(&self, task_id: &str) -> Result<ScheduledTask> {
        let task = self.get_task(task_id).await?;
        self.execute(&task).await?;
        self.get_task(task_id).await
    }

    async fn dispatch(&self, task: &ScheduledTask) -> Result<Value> {
        let task_type: TaskType = task.task_type.parse()?;
        let runner = self.runners.get(&task_type).ok_or_else(|| {
            CuratorError::TaskError(format!("No runner registered for '{}'", task_type))
        })?;
        runner.run(task.library_id.as_deref()).await
    }

    /// Run one task and write lastRunAt, runCount, lastResult and nextRunAt.
    /// Only a bookkeeping failure is returned as an error.
    async fn execute(&self, task: &ScheduledTask) -> Result<()> {
        let started_at = self.clock.now();
        let timer = Instant::now();
        debug!(task_id = %task.id, task_type = %task.task_type, "Executing task");

        let outcome = self.dispatch(task).await;

        let finished_at = self.clock.now();
        let mut result = json!({
            "success": outcome.is_ok(),
            "startedAt": format_timestamp(&started_at),
            "finishedAt": format_timestamp(&finished_at),
            "durationMs": timer.elapsed().as_millis() as u64,
        });
        match outcome {
            Ok(data) => {
                result["data"] = data;
                info!(task_id = %task.id, task_type = %task.task_type, "Task completed");
            }
            Err(e) => {
                result["error"] = Value::String(e.to_string());
                result["retryable"] = Value::Bool(e.is_retryable());
                warn!(task_id = %task.id, task_type = %task.task_type, error = %e, "Task failed");
            }
        }

        let next_run_at = match task.interval_minutes {
            Some(m) => {
                let next = next_run_after(finished_at, m);
                if next.is_none() {
                    // The task stays parked until its interval is fixed
                    result["success"] = Value::Bool(false);
                    result["error"] = Value::String(format!(
                        "Cannot schedule next run: interval of {} minutes is out of range",
                        m
                    ));
                    result["retryable"] = Value::Bool(false);
                    error!(task_id = %task.id, interval_minutes = m, "Task interval out of range");
                }
                next
            }
            None => None,
        };
        self.tasks
            .record_run(&task.id, finished_at, next_run_at, &result)
            .await
    }

    pub async fn create_task(&self, new_task: NewTask) -> Result<ScheduledTask> {
        if new_task.name.trim().is_empty() {
            return Err(CuratorError::ValidationError(
                "Task name must not be empty".to_string(),
            ));
        }
        let task_type: TaskType = new_task.task_type.parse()?;
        validate_interval(new_task.interval_minutes)?;
        if new_task.library_id.is_none() {
            return Err(CuratorError::ValidationError(format!(
                "{} tasks need a libraryId",
                task_type
            )));
        }

        let now = self.clock.now();
        let task = ScheduledTask {
            id: Uuid::new_v4().to_string(),
            name: new_task.name,
            task_type: task_type.as_str().to_string(),
            library_id: new_task.library_id,
            interval_minutes: new_task.interval_minutes,
            enabled: new_task.enabled,
            next_run_at: Some(new_task.next_run_at.unwrap_or(now)),
            last_run_at: None,
            run_count: 0,
            last_result: None,
            created_at: now,
        };
        self.tasks.create(&task).await?;
        info!(task_id = %task.id, task_type = %task.task_type, "Scheduled task created");
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<ScheduledTask> {
        self.tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("Task {} not found", task_id)))
    }

    pub async fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        self.tasks.find_all().await
    }

    pub async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<ScheduledTask> {
        let mut task = self.get_task(task_id).await?;
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(CuratorError::ValidationError(
                    "Task name must not be empty".to_string(),
                ));
            }
            task.name = name;
        }
        if update.interval_minutes.is_some() {
            validate_interval(update.interval_minutes)?;
            task.interval_minutes = update.interval_minutes;
        }
        if let Some(enabled) = update.enabled {
            task.enabled = enabled;
        }
        if update.next_run_at.is_some() {
            task.next_run_at = update.next_run_at;
        }
        self.tasks.update(&task).await?;
        Ok(task)
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        if !self.tasks.delete(task_id).await? {
            return Err(CuratorError::NotFound(format!("Task {} not found", task_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::db::DatabaseManager;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct RecordingRunner {
        calls: Mutex<Vec<Option<String>>>,
        fail: bool,
    }

    impl RecordingRunner {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl TaskRunner for RecordingRunner {
        async fn run(&self, library_id: Option<&str>) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push(library_id.map(str::to_string));
            if self.fail {
                Err(CuratorError::ProviderError("server unreachable".to_string()))
            } else {
                Ok(json!({"itemsAdded": 3}))
            }
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    struct Fixture {
        scheduler: Arc<Scheduler>,
        repo: Arc<ScheduledTaskRepository>,
        clock: Arc<ManualClock>,
    }

    fn fixture(sync: Arc<RecordingRunner>, analysis: Arc<RecordingRunner>, batch_limit: usize) -> Fixture {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        let repo = Arc::new(ScheduledTaskRepository::new(db));
        let clock = Arc::new(ManualClock::new(t0()));
        let scheduler = Scheduler::new(
            repo.clone(),
            clock.clone(),
            batch_limit,
            std::time::Duration::from_millis(10),
        )
        .with_runner(TaskType::LibrarySync, sync)
        .with_runner(TaskType::PatternAnalysis, analysis);
        Fixture {
            scheduler: Arc::new(scheduler),
            repo,
            clock,
        }
    }

    fn new_task(task_type: &str, interval: Option<i64>) -> NewTask {
        NewTask {
            name: format!("{} task", task_type),
            task_type: task_type.to_string(),
            library_id: Some("lib-1".to_string()),
            interval_minutes: interval,
            enabled: true,
            next_run_at: None,
        }
    }

    #[tokio::test]
    async fn test_next_run_follows_interval_on_success_and_failure() {
        let ok = RecordingRunner::new(false);
        let failing = RecordingRunner::new(true);
        let f = fixture(ok.clone(), failing.clone(), 10);

        let sync = f.scheduler.create_task(new_task("library_sync", Some(5))).await.unwrap();
        let analysis = f
            .scheduler
            .create_task(new_task("pattern_analysis", Some(5)))
            .await
            .unwrap();

        assert_eq!(f.scheduler.tick().await.unwrap(), 2);

        for id in [&sync.id, &analysis.id] {
            let task = f.scheduler.get_task(id).await.unwrap();
            assert_eq!(task.next_run_at, Some(t0() + Duration::minutes(5)));
            assert_eq!(task.last_run_at, Some(t0()));
            assert_eq!(task.run_count, 1);
        }

        let ok_result = f.scheduler.get_task(&sync.id).await.unwrap().last_result.unwrap();
        assert_eq!(ok_result["success"], true);
        assert_eq!(ok_result["data"]["itemsAdded"], 3);
        assert_eq!(ok_result["startedAt"], "2024-06-01T08:00:00.000Z");

        let failed = f.scheduler.get_task(&analysis.id).await.unwrap().last_result.unwrap();
        assert_eq!(failed["success"], false);
        assert!(failed["error"].as_str().unwrap().contains("server unreachable"));
        assert_eq!(failed["retryable"], true);

        assert_eq!(ok.calls.lock().unwrap().as_slice(), &[Some("lib-1".to_string())]);

        // Nothing is due until the interval passes
        f.clock.advance(Duration::minutes(4));
        assert_eq!(f.scheduler.tick().await.unwrap(), 0);
        f.clock.advance(Duration::minutes(1));
        assert_eq!(f.scheduler.tick().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_one_shot_task_runs_once() {
        let f = fixture(RecordingRunner::new(false), RecordingRunner::new(false), 10);
        let task = f.scheduler.create_task(new_task("library_sync", None)).await.unwrap();

        assert_eq!(f.scheduler.tick().await.unwrap(), 1);
        let stored = f.scheduler.get_task(&task.id).await.unwrap();
        assert_eq!(stored.next_run_at, None);

        f.clock.advance(Duration::hours(1));
        assert_eq!(f.scheduler.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_captured() {
        let f = fixture(RecordingRunner::new(false), RecordingRunner::new(false), 10);
        f.repo
            .create(&ScheduledTask {
                id: "legacy".to_string(),
                name: "legacy".to_string(),
                task_type: "reindex_everything".to_string(),
                library_id: None,
                interval_minutes: Some(60),
                enabled: true,
                next_run_at: Some(t0()),
                last_run_at: None,
                run_count: 0,
                last_result: None,
                created_at: t0(),
            })
            .await
            .unwrap();
        // full_rescan has no runner in this fixture
        let rescan = f.scheduler.create_task(new_task("full_rescan", Some(60))).await.unwrap();

        assert_eq!(f.scheduler.tick().await.unwrap(), 2);

        let legacy = f.scheduler.get_task("legacy").await.unwrap();
        let result = legacy.last_result.unwrap();
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("Unknown task type"));
        assert_eq!(legacy.next_run_at, Some(t0() + Duration::minutes(60)));

        let rescan = f.scheduler.get_task(&rescan.id).await.unwrap();
        assert_eq!(rescan.last_result.unwrap()["success"], false);
    }

    #[tokio::test]
    async fn test_batch_limit_and_disabled_tasks() {
        let runner = RecordingRunner::new(false);
        let f = fixture(runner.clone(), RecordingRunner::new(false), 2);
        for _ in 0..3 {
            f.scheduler.create_task(new_task("library_sync", Some(10))).await.unwrap();
        }
        let mut disabled = new_task("library_sync", Some(10));
        disabled.enabled = false;
        f.scheduler.create_task(disabled).await.unwrap();

        assert_eq!(f.scheduler.tick().await.unwrap(), 2);
        assert_eq!(f.scheduler.tick().await.unwrap(), 1);
        assert_eq!(f.scheduler.tick().await.unwrap(), 0);
        assert_eq!(runner.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_tick_skipped_while_polling() {
        let f = fixture(RecordingRunner::new(false), RecordingRunner::new(false), 10);
        f.scheduler.create_task(new_task("library_sync", Some(5))).await.unwrap();

        f.scheduler.polling.store(true, Ordering::SeqCst);
        assert_eq!(f.scheduler.tick().await.unwrap(), 0);

        f.scheduler.polling.store(false, Ordering::SeqCst);
        assert_eq!(f.scheduler.tick().await.unwrap(), 1);
        assert!(!f.scheduler.polling.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_now_resets_schedule() {
        let f = fixture(RecordingRunner::new(false), RecordingRunner::new(false), 10);
        let mut input = new_task("library_sync", Some(30));
        input.next_run_at = Some(t0() + Duration::days(1));
        let task = f.scheduler.create_task(input).await.unwrap();

        f.clock.advance(Duration::minutes(2));
        let ran = f.scheduler.run_now(&task.id).await.unwrap();
        assert_eq!(ran.run_count, 1);
        assert_eq!(
            ran.next_run_at,
            Some(t0() + Duration::minutes(2) + Duration::minutes(30))
        );

        assert!(matches!(
            f.scheduler.run_now("missing").await,
            Err(CuratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_task_crud_validation() {
        let f = fixture(RecordingRunner::new(false), RecordingRunner::new(false), 10);

        assert!(matches!(
            f.scheduler.create_task(new_task("defrag", Some(5))).await,
            Err(CuratorError::ValidationError(_))
        ));
        assert!(matches!(
            f.scheduler.create_task(new_task("library_sync", Some(0))).await,
            Err(CuratorError::ValidationError(_))
        ));
        let mut no_library = new_task("library_sync", Some(5));
        no_library.library_id = None;
        assert!(matches!(
            f.scheduler.create_task(no_library).await,
            Err(CuratorError::ValidationError(_))
        ));

        let task = f.scheduler.create_task(new_task("librarySync", Some(5))).await.unwrap();
        assert_eq!(task.task_type, "library_sync");
        assert_eq!(task.next_run_at, Some(t0()));

        let updated = f
            .scheduler
            .update_task(
                &task.id,
                TaskUpdate {
                    enabled: Some(false),
                    interval_minutes: Some(15),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.interval_minutes, Some(15));
        assert_eq!(f.scheduler.list_tasks().await.unwrap().len(), 1);

        f.scheduler.delete_task(&task.id).await.unwrap();
        assert!(matches!(
            f.scheduler.delete_task(&task.id).await,
            Err(CuratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_interval_is_rejected() {
        let f = fixture(RecordingRunner::new(false), RecordingRunner::new(false), 10);
        assert!(matches!(
            f.scheduler
                .create_task(new_task("library_sync", Some(1_000_000_000_000)))
                .await,
            Err(CuratorError::ValidationError(_))
        ));

        let task = f
            .scheduler
            .create_task(new_task("library_sync", Some(MAX_INTERVAL_MINUTES)))
            .await
            .unwrap();
        assert!(matches!(
            f.scheduler
                .update_task(
                    &task.id,
                    TaskUpdate {
                        interval_minutes: Some(MAX_INTERVAL_MINUTES + 1),
                        ..Default::default()
                    },
                )
                .await,
            Err(CuratorError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_unschedulable_interval_fails_only_that_task() {
        let runner = RecordingRunner::new(false);
        let f = fixture(runner.clone(), RecordingRunner::new(false), 10);
        f.repo
            .create(&ScheduledTask {
                id: "huge".to_string(),
                name: "huge".to_string(),
                task_type: "library_sync".to_string(),
                library_id: Some("lib-1".to_string()),
                interval_minutes: Some(1_000_000_000_000),
                enabled: true,
                next_run_at: Some(t0()),
                last_run_at: None,
                run_count: 0,
                last_result: None,
                created_at: t0(),
            })
            .await
            .unwrap();
        let normal = f.scheduler.create_task(new_task("library_sync", Some(5))).await.unwrap();

        assert_eq!(f.scheduler.tick().await.unwrap(), 2);
        assert_eq!(runner.calls.lock().unwrap().len(), 2);

        let huge = f.scheduler.get_task("huge").await.unwrap();
        let result = huge.last_result.unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["retryable"], false);
        assert!(result["error"].as_str().unwrap().contains("out of range"));
        assert_eq!(huge.next_run_at, None);
        assert_eq!(huge.run_count, 1);

        let normal = f.scheduler.get_task(&normal.id).await.unwrap();
        assert_eq!(normal.next_run_at, Some(t0() + Duration::minutes(5)));

        // Parked, not retried every poll
        f.clock.advance(Duration::minutes(5));
        assert_eq!(f.scheduler.tick().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let runner = RecordingRunner::new(false);
        let f = fixture(runner.clone(), RecordingRunner::new(false), 10);
        f.scheduler.create_task(new_task("library_sync", Some(5))).await.unwrap();

        let handle = tokio::spawn(f.scheduler.clone().start());
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        f.scheduler.shutdown().await;
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        // The manual clock never advanced, so the task ran exactly once
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }
}

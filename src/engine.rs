//! Run orchestration engine.
//!
//! A run validates its input, creates a run record, then walks the selected
//! categories strictly one after another: log, execute, persist, report
//! progress. Cancellation is cooperative and only observed between
//! categories. A category that errors is recorded as a failed case; a store
//! failure is fatal to the run, which is then marked `failed`.

use crate::category::Category;
use crate::executor::{CaseExecutor, Verdict};
use crate::model::{CaseStatus, NewCase, NewRun, RunPatch, RunStatus, TestCase};
use crate::observer::{LogKind, Observers, RunObserver};
use crate::storage::{RunStore, StoreError};
use crate::target;
use chrono::Utc;
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("no test categories selected")]
    NoCategoriesSelected,

    #[error("run store failure: {0}")]
    Store(#[from] StoreError),

    #[error("run task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What to run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub target: String,
    /// Executed in this order; repeats are dropped.
    pub categories: Vec<Category>,
    pub project_id: Option<String>,
}

impl RunRequest {
    pub fn new(target: impl Into<String>, categories: impl IntoIterator<Item = Category>) -> Self {
        Self {
            target: target.into(),
            categories: categories.into_iter().collect(),
            project_id: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// Aggregate result of a run, complete or partial.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    /// Normalized target URL.
    pub target: String,
    /// Target as the caller supplied it.
    pub requested: String,
    pub status: RunStatus,
    /// Categories requested.
    pub selected: usize,
    /// Cases actually executed.
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Artificial waits between steps. Zero by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pacing {
    /// Before each executor call.
    pub generate: Duration,
    /// After each category completes.
    pub settle: Duration,
}

/// A validated request with its run record already created.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub run_id: String,
    pub target: Url,
    pub requested: String,
    pub categories: Vec<Category>,
}

/// Handle to a run executing in the background.
pub struct RunHandle {
    run_id: String,
    cancel: CancellationToken,
    task: JoinHandle<Result<RunSummary, EngineError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Request cancellation. The category in flight finishes first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<RunSummary, EngineError> {
        self.task.await?
    }
}

pub struct Engine {
    store: Arc<dyn RunStore>,
    executor: CaseExecutor,
    observers: Observers,
    pacing: Pacing,
}

impl Engine {
    pub fn new(store: Arc<dyn RunStore>, executor: CaseExecutor) -> Self {
        Self {
            store,
            executor,
            observers: Observers::default(),
            pacing: Pacing::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Validate, create the run record, and drive the run on a spawned task.
    /// Input errors surface here, before any record exists.
    pub async fn start_run(self: &Arc<Self>, request: RunRequest) -> Result<RunHandle, EngineError> {
        let prepared = self.prepare(request).await?;
        Ok(self.spawn(prepared, CancellationToken::new()))
    }

    /// Drive an already prepared run on a spawned task.
    pub fn spawn(self: &Arc<Self>, prepared: PreparedRun, cancel: CancellationToken) -> RunHandle {
        let run_id = prepared.run_id.clone();
        let engine = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { engine.drive(prepared, token).await });

        RunHandle {
            run_id,
            cancel,
            task,
        }
    }

    /// Execute a run to completion on the current task.
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunSummary, EngineError> {
        let prepared = self.prepare(request).await?;
        self.drive(prepared, cancel).await
    }

    /// Validate input and create the run record with status `running`.
    pub async fn prepare(&self, request: RunRequest) -> Result<PreparedRun, EngineError> {
        let target =
            target::normalize(&request.target).map_err(|reason| EngineError::InvalidTarget {
                target: request.target.clone(),
                reason,
            })?;

        let mut categories: Vec<Category> = Vec::with_capacity(request.categories.len());
        for c in request.categories {
            if !categories.contains(&c) {
                categories.push(c);
            }
        }
        if categories.is_empty() {
            return Err(EngineError::NoCategoriesSelected);
        }

        let project_id = request
            .project_id
            .unwrap_or_else(|| format!("temp-{}", Utc::now().timestamp_millis()));
        let run = self
            .store
            .create_run(NewRun {
                project_id,
                status: RunStatus::Running,
            })
            .await?;
        info!(run_id = %run.id, %target, categories = categories.len(), strategy = self.executor.strategy_name(), "Run created");

        Ok(PreparedRun {
            run_id: run.id,
            target,
            requested: request.target.trim().to_string(),
            categories,
        })
    }

    /// Walk the categories of a prepared run.
    pub async fn drive(
        &self,
        prepared: PreparedRun,
        cancel: CancellationToken,
    ) -> Result<RunSummary, EngineError> {
        let PreparedRun {
            run_id,
            target,
            requested,
            categories,
        } = prepared;

        let mut tally = Tally::new(&run_id, &target, requested, categories.len());
        self.observers.log(
            &run_id,
            LogKind::Start,
            format!("Starting test run: analyzing website {}", target),
        );

        for category in categories.iter().copied() {
            if cancel.is_cancelled() {
                return self.cancel_run(tally).await;
            }

            if let Err(e) = self.step(&mut tally, category, &target).await {
                return Err(self.fail_run(&tally, e).await);
            }
        }

        let finished = self
            .store
            .update_run(&run_id, RunPatch::finish(RunStatus::Completed, Utc::now()))
            .await;
        if let Err(e) = finished {
            return Err(self.fail_run(&tally, e.into()).await);
        }

        let summary = tally.summary(RunStatus::Completed);
        self.observers.log(
            &run_id,
            LogKind::Complete,
            format!(
                "All tests completed: {}/{} passed",
                summary.passed, summary.total
            ),
        );
        self.observers.run_complete(&summary);
        Ok(summary)
    }

    /// One category: generate, execute, persist, report.
    async fn step(
        &self,
        tally: &mut Tally,
        category: Category,
        target: &Url,
    ) -> Result<(), EngineError> {
        let run_id = tally.run_id.clone();
        self.observers.log(
            &run_id,
            LogKind::Generating { category },
            format!("Generating {} tests...", category.label()),
        );
        pause(self.pacing.generate).await;

        let verdict = self.executor.execute(category, target).await;
        self.observers.log(
            &run_id,
            LogKind::Executing { category },
            format!("Executing {} test...", category.label()),
        );

        let case = self.persist_case(&run_id, category, verdict).await?;
        tally.record(&case);
        self.store
            .update_run(&run_id, RunPatch::test_cases(tally.case_ids.clone()))
            .await?;

        let word = match case.status {
            CaseStatus::Pass => "PASSED",
            CaseStatus::Fail => "FAILED",
        };
        self.observers.log(
            &run_id,
            LogKind::Verdict {
                category,
                status: case.status,
            },
            format!("{} test {}", category.label(), word),
        );
        self.observers.case_complete(&case);
        self.observers.progress(&run_id, tally.progress());
        debug!(%run_id, %category, progress = tally.progress(), "Category finished");

        pause(self.pacing.settle).await;
        Ok(())
    }

    async fn persist_case(
        &self,
        run_id: &str,
        category: Category,
        verdict: Verdict,
    ) -> Result<TestCase, StoreError> {
        self.store
            .create_case(NewCase {
                run_id: run_id.to_string(),
                name: category.case_name(),
                category,
                status: verdict.status,
                duration: verdict.duration_ms,
                logs: verdict.logs,
                screenshot: verdict.screenshot,
            })
            .await
    }

    async fn cancel_run(&self, tally: Tally) -> Result<RunSummary, EngineError> {
        let run_id = tally.run_id.clone();
        warn!(%run_id, completed = tally.completed(), "Run cancelled");
        if let Err(e) = self
            .store
            .update_run(&run_id, RunPatch::finish(RunStatus::Failed, Utc::now()))
            .await
        {
            return Err(self.fail_run(&tally, e.into()).await);
        }

        let summary = tally.summary(RunStatus::Failed);
        self.observers.log(
            &run_id,
            LogKind::Cancelled,
            format!(
                "Run cancelled after {} of {} categories",
                summary.total, summary.selected
            ),
        );
        self.observers.run_complete(&summary);
        Ok(summary)
    }

    /// Log the error, leave the run `failed`, and hand the error back.
    /// Observers still see the run complete with the cases recorded so far.
    async fn fail_run(&self, tally: &Tally, err: EngineError) -> EngineError {
        let run_id = tally.run_id.as_str();
        self.observers
            .log(run_id, LogKind::Error, format!("Error: {}", err));
        if let Err(e) = self
            .store
            .update_run(run_id, RunPatch::finish(RunStatus::Failed, Utc::now()))
            .await
        {
            warn!(%run_id, error = %e, "Could not mark run as failed");
        }
        self.observers.run_complete(&tally.summary(RunStatus::Failed));
        err
    }
}

/// Transient per-run working state, dropped when the run finishes.
struct Tally {
    run_id: String,
    target: String,
    requested: String,
    selected: usize,
    case_ids: Vec<String>,
    passed: usize,
    failed: usize,
}

impl Tally {
    fn new(run_id: &str, target: &Url, requested: String, selected: usize) -> Self {
        Self {
            run_id: run_id.to_string(),
            target: target.to_string(),
            requested,
            selected,
            case_ids: Vec::with_capacity(selected),
            passed: 0,
            failed: 0,
        }
    }

    fn record(&mut self, case: &TestCase) {
        self.case_ids.push(case.id.clone());
        match case.status {
            CaseStatus::Pass => self.passed += 1,
            CaseStatus::Fail => self.failed += 1,
        }
    }

    fn completed(&self) -> usize {
        self.case_ids.len()
    }

    fn progress(&self) -> f64 {
        if self.completed() == self.selected {
            return 100.0;
        }
        self.completed() as f64 / self.selected as f64 * 100.0
    }

    fn summary(&self, status: RunStatus) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            target: self.target.clone(),
            requested: self.requested.clone(),
            status,
            selected: self.selected,
            total: self.completed(),
            passed: self.passed,
            failed: self.failed,
        }
    }
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SimulatedStrategy;
    use crate::storage::MemoryStore;

    fn engine(store: Arc<MemoryStore>) -> Engine {
        let executor = CaseExecutor::new(Arc::new(SimulatedStrategy::new(Some(1))));
        Engine::new(store, executor)
    }

    #[tokio::test]
    async fn test_duplicates_dropped_keeping_first() {
        let store = Arc::new(MemoryStore::open());
        let prepared = engine(store)
            .prepare(RunRequest::new(
                "example.com",
                [Category::Forms, Category::Login, Category::Forms],
            ))
            .await
            .unwrap();
        assert_eq!(prepared.categories, vec![Category::Forms, Category::Login]);
        assert_eq!(prepared.target.as_str(), "https://example.com/");
    }

    #[tokio::test]
    async fn test_placeholder_project_id() {
        let store = Arc::new(MemoryStore::open());
        let prepared = engine(store.clone())
            .prepare(RunRequest::new("example.com", [Category::Links]))
            .await
            .unwrap();
        let run = store.get_run(&prepared.run_id).await.unwrap();
        assert!(run.project_id.starts_with("temp-"));
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn test_progress_reaches_exactly_100() {
        let target = Url::parse("https://example.com/").unwrap();
        let mut tally = Tally::new("r", &target, "example.com".to_string(), 3);
        let mut seen = Vec::new();
        for i in 0..3 {
            tally.record(&TestCase {
                id: format!("c{i}"),
                run_id: "r".to_string(),
                name: String::new(),
                category: Category::Login,
                status: CaseStatus::Pass,
                duration: 1,
                logs: vec![],
                screenshot: None,
            });
            seen.push(tally.progress());
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(100.0));
    }
}

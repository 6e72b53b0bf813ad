//! Case execution: one category checked against one target.
//!
//! A [`CheckStrategy`] decides the verdict; [`CaseExecutor`] wraps it so the
//! engine always receives a well-formed [`Verdict`], even when the strategy
//! errors or runs past its timeout.

pub mod driver;
pub mod simulated;

pub use self::driver::{AutomationDriver, CheckOutcome, DriverStrategy, HttpDriver, PageLoad};
pub use self::simulated::SimulatedStrategy;

use crate::category::Category;
use crate::model::CaseStatus;
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Errors a strategy may raise instead of returning a verdict.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("automation driver error: {0}")]
    Driver(String),
}

/// Outcome of one category's check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub status: CaseStatus,
    /// Milliseconds, always > 0.
    pub duration_ms: u64,
    pub logs: Vec<String>,
    pub screenshot: Option<String>,
}

impl Verdict {
    /// Log trail shared by every strategy: navigation, analysis, outcome.
    pub fn trail(category: Category, target: &Url, outcome: String) -> Vec<String> {
        vec![
            format!("Navigating to {}", target),
            format!("Analyzing {} elements...", category.key()),
            outcome,
        ]
    }

    fn failed(category: Category, target: &Url, reason: String, elapsed: Duration) -> Self {
        let mut logs = Self::trail(category, target, reason);
        logs.push(format!("FAIL: {} test did not complete", category.label()));
        Self {
            status: CaseStatus::Fail,
            duration_ms: elapsed_ms(elapsed),
            logs,
            screenshot: None,
        }
    }
}

/// Capability that produces a verdict for a category.
///
/// Implementations must not touch run state; the engine owns that.
#[async_trait::async_trait]
pub trait CheckStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, category: Category, target: &Url) -> Result<Verdict, CheckError>;
}

/// Runs a strategy with error recovery and an optional timeout.
#[derive(Clone)]
pub struct CaseExecutor {
    strategy: Arc<dyn CheckStrategy>,
    timeout: Option<Duration>,
}

impl CaseExecutor {
    pub fn new(strategy: Arc<dyn CheckStrategy>) -> Self {
        Self {
            strategy,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Execute one category. Never fails: strategy errors, panics and
    /// timeouts come back as `fail` verdicts carrying an explanatory log line.
    pub async fn execute(&self, category: Category, target: &Url) -> Verdict {
        let start = Instant::now();
        let strategy = Arc::clone(&self.strategy);
        let page = target.clone();
        let mut task = tokio::spawn(async move { strategy.check(category, &page).await });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    warn!(%category, timeout_ms = %limit.as_millis(), "Category check timed out");
                    return Verdict::failed(
                        category,
                        target,
                        format!("Timed out after {}ms", limit.as_millis()),
                        start.elapsed(),
                    );
                }
            },
            None => task.await,
        };

        let outcome = match joined {
            Ok(result) => result,
            Err(e) => {
                let reason = if e.is_panic() {
                    "Execution error: check panicked".to_string()
                } else {
                    "Execution error: check was aborted".to_string()
                };
                warn!(%category, error = %e, "Category check task failed");
                return Verdict::failed(category, target, reason, start.elapsed());
            }
        };

        match outcome {
            Ok(mut verdict) => {
                verdict.duration_ms = verdict.duration_ms.max(1);
                if verdict.logs.is_empty() {
                    let line = match verdict.status {
                        CaseStatus::Pass => "PASS: test completed successfully",
                        CaseStatus::Fail => "FAIL: test failed",
                    };
                    verdict.logs = Verdict::trail(category, target, line.to_string());
                }
                verdict
            }
            Err(e) => {
                warn!(%category, error = %e, "Category check raised an error");
                Verdict::failed(
                    category,
                    target,
                    format!("Execution error: {}", e),
                    start.elapsed(),
                )
            }
        }
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX).max(1)
}

//! Engine events and the observers that consume them.
//!
//! Observers are notified synchronously and must not block; anything slow
//! belongs behind a channel (see [`ChannelObserver`]).

use crate::category::Category;
use crate::engine::RunSummary;
use crate::model::{CaseStatus, TestCase};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// What a log line announces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogKind {
    Start,
    Generating { category: Category },
    Executing { category: Category },
    Verdict { category: Category, status: CaseStatus },
    Complete,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    #[serde(flatten)]
    pub kind: LogKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Sink for engine events. Every method defaults to a no-op.
pub trait RunObserver: Send + Sync {
    fn on_log(&self, _run_id: &str, _entry: &LogEntry) {}

    /// Cumulative completion in percent, 0..=100.
    fn on_progress(&self, _run_id: &str, _percent: f64) {}

    fn on_case_complete(&self, _case: &TestCase) {}

    fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// Owned form of an engine event, for channels and buffers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Log { run_id: String, entry: LogEntry },
    Progress { run_id: String, percent: f64 },
    CaseComplete { case: TestCase },
    RunComplete { summary: RunSummary },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::Log { run_id, .. } | RunEvent::Progress { run_id, .. } => run_id,
            RunEvent::CaseComplete { case } => &case.run_id,
            RunEvent::RunComplete { summary } => &summary.run_id,
        }
    }
}

/// Mirrors engine events into the trace log.
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_log(&self, run_id: &str, entry: &LogEntry) {
        match entry.kind {
            LogKind::Error => error!(run_id, "{}", entry.message),
            LogKind::Cancelled => warn!(run_id, "{}", entry.message),
            _ => info!(run_id, "{}", entry.message),
        }
    }

    fn on_case_complete(&self, case: &TestCase) {
        info!(
            run_id = %case.run_id,
            case_id = %case.id,
            category = %case.category,
            status = %case.status,
            duration_ms = case.duration,
            "Case recorded"
        );
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        info!(
            run_id = %summary.run_id,
            status = %summary.status,
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            "Run finished"
        );
    }
}

/// Forwards events into an unbounded channel. Sends to a dropped receiver
/// are discarded.
#[derive(Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }
}

impl RunObserver for ChannelObserver {
    fn on_log(&self, run_id: &str, entry: &LogEntry) {
        self.send(RunEvent::Log {
            run_id: run_id.to_string(),
            entry: entry.clone(),
        });
    }

    fn on_progress(&self, run_id: &str, percent: f64) {
        self.send(RunEvent::Progress {
            run_id: run_id.to_string(),
            percent,
        });
    }

    fn on_case_complete(&self, case: &TestCase) {
        self.send(RunEvent::CaseComplete { case: case.clone() });
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        self.send(RunEvent::RunComplete {
            summary: summary.clone(),
        });
    }
}

/// Fan-out over every attached observer, in attachment order.
#[derive(Clone, Default)]
pub struct Observers {
    inner: Vec<Arc<dyn RunObserver>>,
}

impl Observers {
    pub fn push(&mut self, observer: Arc<dyn RunObserver>) {
        self.inner.push(observer);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn log(&self, run_id: &str, kind: LogKind, message: String) {
        let entry = LogEntry::new(kind, message);
        for o in &self.inner {
            o.on_log(run_id, &entry);
        }
    }

    pub(crate) fn progress(&self, run_id: &str, percent: f64) {
        for o in &self.inner {
            o.on_progress(run_id, percent);
        }
    }

    pub(crate) fn case_complete(&self, case: &TestCase) {
        for o in &self.inner {
            o.on_case_complete(case);
        }
    }

    pub(crate) fn run_complete(&self, summary: &RunSummary) {
        for o in &self.inner {
            o.on_run_complete(summary);
        }
    }
}

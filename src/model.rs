//! Persisted records: runs, cases, and projects.
//!
//! Field names serialize in camelCase so the JSON shape matches what the
//! front-end stores and renders.

use crate::category::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// pending -> running -> {completed, failed}. Rewriting the current
    /// status is allowed and changes nothing.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Pass,
    Fail,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Pass => "pass",
            CaseStatus::Fail => "fail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(CaseStatus::Pass),
            "fail" => Some(CaseStatus::Fail),
            _ => None,
        }
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub id: String,
    pub project_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub test_cases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub run_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub category: Category,
    pub status: CaseStatus,
    /// Milliseconds.
    pub duration: u64,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestProject {
    pub id: String,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub test_runs: Vec<String>,
}

/// Fields supplied when a run record is created. The store assigns the id
/// and start time.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub project_id: String,
    pub status: RunStatus,
}

/// Partial update of a run. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub test_cases: Option<Vec<String>>,
}

impl RunPatch {
    pub fn test_cases(ids: Vec<String>) -> Self {
        Self {
            test_cases: Some(ids),
            ..Self::default()
        }
    }

    /// Move the run into a terminal status, stamping the end time.
    pub fn finish(status: RunStatus, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            end_time: Some(at),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid run status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunStatus,
    pub to: RunStatus,
}

impl TestRun {
    /// Apply a patch while holding the status and end-time invariants:
    /// transitions must be legal, and `end_time` is set exactly when the
    /// status is terminal (stamped with now if the patch omits it).
    pub fn apply(&mut self, patch: RunPatch) -> Result<(), InvalidTransition> {
        let next = patch.status.unwrap_or(self.status);
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        if next.is_terminal() {
            if self.end_time.is_none() || next != self.status {
                self.end_time = Some(patch.end_time.unwrap_or_else(Utc::now));
            }
        } else {
            self.end_time = None;
        }
        self.status = next;

        if let Some(ids) = patch.test_cases {
            self.test_cases = ids;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NewCase {
    pub run_id: String,
    pub name: String,
    pub category: Category,
    pub status: CaseStatus,
    pub duration: u64,
    pub logs: Vec<String>,
    pub screenshot: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub url: String,
    pub test_runs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub test_runs: Option<Vec<String>>,
}

impl TestProject {
    pub fn apply(&mut self, patch: ProjectPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(url) = patch.url {
            self.url = url;
        }
        if let Some(runs) = patch.test_runs {
            self.test_runs = runs;
        }
    }
}

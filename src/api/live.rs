//! In-memory view of runs started through the API.
//!
//! Registered as an engine observer; keeps each run's log lines and latest
//! progress so clients can poll them, plus the cancellation token for runs
//! still in flight. Only the most recent finished runs are retained.

use crate::engine::RunSummary;
use crate::observer::{LogEntry, RunObserver};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Finished snapshots kept by default.
pub const DEFAULT_RETAINED: usize = 256;

#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveSnapshot {
    pub progress: f64,
    pub logs: Vec<LogEntry>,
    pub finished: bool,
    pub summary: Option<RunSummary>,
}

#[derive(Default)]
struct LiveRun {
    snapshot: LiveSnapshot,
    cancel: Option<CancellationToken>,
}

#[derive(Default)]
struct Registry {
    runs: HashMap<String, LiveRun>,
    /// Finished run ids, oldest first.
    finished: VecDeque<String>,
}

impl Registry {
    fn entry(&mut self, run_id: &str) -> &mut LiveRun {
        self.runs.entry(run_id.to_string()).or_default()
    }
}

pub struct LiveRuns {
    inner: Mutex<Registry>,
    retain: usize,
}

impl Default for LiveRuns {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED)
    }
}

impl LiveRuns {
    /// Keep at most `retain` finished runs; in-flight runs are never evicted.
    pub fn new(retain: usize) -> Self {
        Self {
            inner: Mutex::new(Registry::default()),
            retain,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remember the cancellation token of a prepared run. Call before the
    /// run is spawned so the token is never attached to a finished run.
    pub fn track(&self, run_id: &str, cancel: CancellationToken) {
        let mut reg = self.lock();
        let run = reg.entry(run_id);
        if !run.snapshot.finished {
            run.cancel = Some(cancel);
        }
    }

    /// Signal cancellation. Returns false when the run is unknown or done.
    pub fn cancel(&self, run_id: &str) -> bool {
        let reg = self.lock();
        match reg.runs.get(run_id).and_then(|r| r.cancel.as_ref()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, run_id: &str) -> Option<LiveSnapshot> {
        self.lock().runs.get(run_id).map(|r| r.snapshot.clone())
    }

    /// Number of runs currently held, in flight or finished.
    pub fn len(&self) -> usize {
        self.lock().runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RunObserver for LiveRuns {
    fn on_log(&self, run_id: &str, entry: &LogEntry) {
        self.lock().entry(run_id).snapshot.logs.push(entry.clone());
    }

    fn on_progress(&self, run_id: &str, percent: f64) {
        self.lock().entry(run_id).snapshot.progress = percent;
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        let mut reg = self.lock();
        let run = reg.entry(&summary.run_id);
        let first = !run.snapshot.finished;
        run.snapshot.finished = true;
        run.snapshot.summary = Some(summary.clone());
        run.cancel = None;

        if first {
            reg.finished.push_back(summary.run_id.clone());
        }
        while reg.finished.len() > self.retain {
            if let Some(old) = reg.finished.pop_front() {
                reg.runs.remove(&old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;
    use crate::observer::LogKind;

    #[test]
    fn test_cancel_only_while_in_flight() {
        let live = LiveRuns::default();
        let token = CancellationToken::new();
        assert!(!live.cancel("r1"));

        live.track("r1", token.clone());
        assert!(live.cancel("r1"));
        assert!(token.is_cancelled());

        live.on_run_complete(&RunSummary {
            run_id: "r1".to_string(),
            target: "https://example.com/".to_string(),
            requested: "example.com".to_string(),
            status: RunStatus::Failed,
            selected: 2,
            total: 0,
            passed: 0,
            failed: 0,
        });
        assert!(!live.cancel("r1"));
        assert!(live.snapshot("r1").unwrap().finished);
    }

    #[test]
    fn test_events_before_track_are_kept() {
        let live = LiveRuns::default();
        live.on_log("r2", &LogEntry::new(LogKind::Start, "start"));
        live.on_progress("r2", 25.0);
        live.track("r2", CancellationToken::new());

        let snap = live.snapshot("r2").unwrap();
        assert_eq!(snap.logs.len(), 1);
        assert_eq!(snap.progress, 25.0);
    }

    fn finished(run_id: &str) -> RunSummary {
        RunSummary {
            run_id: run_id.to_string(),
            target: "https://example.com/".to_string(),
            requested: "example.com".to_string(),
            status: RunStatus::Completed,
            selected: 1,
            total: 1,
            passed: 1,
            failed: 0,
        }
    }

    #[test]
    fn test_oldest_finished_runs_are_evicted() {
        let live = LiveRuns::new(2);
        live.track("busy", CancellationToken::new());
        for id in ["a", "b", "c"] {
            live.on_log(id, &LogEntry::new(LogKind::Start, "start"));
            live.on_run_complete(&finished(id));
        }

        assert!(live.snapshot("a").is_none());
        assert!(live.snapshot("b").unwrap().finished);
        assert!(live.snapshot("c").unwrap().finished);
        assert!(live.cancel("busy"));
        assert_eq!(live.len(), 3);
    }

    #[test]
    fn test_repeated_completion_counts_once() {
        let live = LiveRuns::new(1);
        live.on_run_complete(&finished("a"));
        live.on_run_complete(&finished("a"));
        assert!(live.snapshot("a").is_some());
        live.on_run_complete(&finished("b"));
        assert!(live.snapshot("a").is_none());
        assert_eq!(live.len(), 1);
    }
}

//! Projects and dashboard statistics.

use crate::engine::RunSummary;
use crate::model::{CaseStatus, NewProject, RunStatus, TestProject};
use crate::storage::{RunStore, StoreError};
use reqwest::Url;
use serde::Serialize;
use tracing::info;

/// Register a project for a completed run. Runs that did not complete
/// produce no project.
pub async fn register_completed_run(
    store: &dyn RunStore,
    summary: &RunSummary,
) -> Result<Option<TestProject>, StoreError> {
    if summary.status != RunStatus::Completed {
        return Ok(None);
    }

    let host = Url::parse(&summary.target)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| summary.target.clone());

    let project = store
        .create_project(NewProject {
            name: format!("Test - {}", host),
            url: summary.requested.clone(),
            test_runs: vec![summary.run_id.clone()],
        })
        .await?;
    info!(project_id = %project.id, run_id = %summary.run_id, "Project registered");
    Ok(Some(project))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_projects: usize,
    pub active_runs: usize,
    /// Percentage of completed runs in which every case passed.
    pub success_rate: u32,
}

pub async fn dashboard(store: &dyn RunStore) -> Result<DashboardStats, StoreError> {
    let total_projects = store.list_projects().await?.len();
    let runs = store.list_runs().await?;
    let active_runs = runs
        .iter()
        .filter(|r| r.status == RunStatus::Running)
        .count();

    let mut completed = 0usize;
    let mut clean = 0usize;
    for run in runs.iter().filter(|r| r.status == RunStatus::Completed) {
        completed += 1;
        let cases = store.list_cases_by_run(&run.id).await?;
        if cases.iter().all(|c| c.status == CaseStatus::Pass) {
            clean += 1;
        }
    }

    let success_rate = if completed == 0 {
        0
    } else {
        (clean as f64 / completed as f64 * 100.0).round() as u32
    };

    Ok(DashboardStats {
        total_projects,
        active_runs,
        success_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::model::{NewCase, NewRun, RunPatch};
    use crate::storage::MemoryStore;
    use chrono::Utc;

    async fn completed_run(store: &MemoryStore, statuses: &[CaseStatus]) -> String {
        let run = store
            .create_run(NewRun {
                project_id: "p".to_string(),
                status: RunStatus::Running,
            })
            .await
            .unwrap();
        for status in statuses {
            store
                .create_case(NewCase {
                    run_id: run.id.clone(),
                    name: "x".to_string(),
                    category: Category::Login,
                    status: *status,
                    duration: 5,
                    logs: vec![],
                    screenshot: None,
                })
                .await
                .unwrap();
        }
        store
            .update_run(&run.id, RunPatch::finish(RunStatus::Completed, Utc::now()))
            .await
            .unwrap();
        run.id
    }

    #[tokio::test]
    async fn test_empty_store_stats() {
        let store = MemoryStore::open();
        let stats = dashboard(&store).await.unwrap();
        assert_eq!(
            stats,
            DashboardStats {
                total_projects: 0,
                active_runs: 0,
                success_rate: 0
            }
        );
    }

    #[tokio::test]
    async fn test_success_rate_counts_clean_runs() {
        let store = MemoryStore::open();
        completed_run(&store, &[CaseStatus::Pass, CaseStatus::Pass]).await;
        completed_run(&store, &[CaseStatus::Pass, CaseStatus::Fail]).await;
        completed_run(&store, &[CaseStatus::Pass]).await;
        store
            .create_run(NewRun {
                project_id: "p".to_string(),
                status: RunStatus::Running,
            })
            .await
            .unwrap();

        let stats = dashboard(&store).await.unwrap();
        assert_eq!(stats.active_runs, 1);
        assert_eq!(stats.success_rate, 67);
    }

    #[tokio::test]
    async fn test_register_uses_hostname() {
        let store = MemoryStore::open();
        let summary = RunSummary {
            run_id: "r1".to_string(),
            target: "https://shop.example.com/cart".to_string(),
            requested: "shop.example.com/cart".to_string(),
            status: RunStatus::Completed,
            selected: 1,
            total: 1,
            passed: 1,
            failed: 0,
        };
        let project = register_completed_run(&store, &summary)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(project.name, "Test - shop.example.com");
        assert_eq!(project.url, "shop.example.com/cart");
        assert_eq!(project.test_runs, vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_run_registers_nothing() {
        let store = MemoryStore::open();
        let summary = RunSummary {
            run_id: "r1".to_string(),
            target: "https://example.com/".to_string(),
            requested: "https://example.com".to_string(),
            status: RunStatus::Failed,
            selected: 2,
            total: 1,
            passed: 1,
            failed: 0,
        };
        assert!(register_completed_run(&store, &summary)
            .await
            .unwrap()
            .is_none());
        assert!(store.list_projects().await.unwrap().is_empty());
    }
}

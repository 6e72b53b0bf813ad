//! In-process run store.
//!
//! All records live behind a single `RwLock`, so writes to any record are
//! serialized. Intended for tests, the CLI's throwaway mode, and demos.

use super::{new_id, RunStore, StoreError};
use crate::model::{
    NewCase, NewProject, NewRun, ProjectPatch, RunPatch, TestCase, TestProject, TestRun,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    runs: HashMap<String, TestRun>,
    run_order: Vec<String>,
    cases: HashMap<String, TestCase>,
    case_order: Vec<String>,
    projects: HashMap<String, TestProject>,
    project_order: Vec<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn open() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, new: NewRun) -> Result<TestRun, StoreError> {
        self.ensure_open()?;
        let start_time = Utc::now();
        let run = TestRun {
            id: new_id(),
            project_id: new.project_id,
            status: new.status,
            start_time,
            end_time: new.status.is_terminal().then_some(start_time),
            test_cases: Vec::new(),
        };
        let mut t = self.tables.write().await;
        t.run_order.push(run.id.clone());
        t.runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn update_run(&self, id: &str, patch: RunPatch) -> Result<TestRun, StoreError> {
        self.ensure_open()?;
        let mut t = self.tables.write().await;
        let run = t
            .runs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("test run", id))?;
        // Validate against a copy so a rejected patch leaves no trace.
        let mut next = run.clone();
        next.apply(patch)?;
        *run = next.clone();
        Ok(next)
    }

    async fn get_run(&self, id: &str) -> Result<TestRun, StoreError> {
        self.ensure_open()?;
        let t = self.tables.read().await;
        t.runs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("test run", id))
    }

    async fn list_runs(&self) -> Result<Vec<TestRun>, StoreError> {
        self.ensure_open()?;
        let t = self.tables.read().await;
        Ok(t.run_order
            .iter()
            .filter_map(|id| t.runs.get(id).cloned())
            .collect())
    }

    async fn list_runs_by_project(&self, project_id: &str) -> Result<Vec<TestRun>, StoreError> {
        Ok(self
            .list_runs()
            .await?
            .into_iter()
            .filter(|r| r.project_id == project_id)
            .collect())
    }

    async fn delete_run(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut t = self.tables.write().await;
        if t.runs.remove(id).is_none() {
            return Err(StoreError::not_found("test run", id));
        }
        t.run_order.retain(|r| r != id);
        let orphaned: Vec<String> = t
            .cases
            .values()
            .filter(|c| c.run_id == id)
            .map(|c| c.id.clone())
            .collect();
        for case_id in &orphaned {
            t.cases.remove(case_id);
        }
        t.case_order.retain(|c| !orphaned.contains(c));
        Ok(())
    }

    async fn create_case(&self, new: NewCase) -> Result<TestCase, StoreError> {
        self.ensure_open()?;
        let case = TestCase {
            id: new_id(),
            run_id: new.run_id,
            name: new.name,
            category: new.category,
            status: new.status,
            duration: new.duration,
            logs: new.logs,
            screenshot: new.screenshot,
        };
        let mut t = self.tables.write().await;
        t.case_order.push(case.id.clone());
        t.cases.insert(case.id.clone(), case.clone());
        Ok(case)
    }

    async fn get_case(&self, id: &str) -> Result<TestCase, StoreError> {
        self.ensure_open()?;
        let t = self.tables.read().await;
        t.cases
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("test case", id))
    }

    async fn list_cases_by_run(&self, run_id: &str) -> Result<Vec<TestCase>, StoreError> {
        self.ensure_open()?;
        let t = self.tables.read().await;
        Ok(t.case_order
            .iter()
            .filter_map(|id| t.cases.get(id))
            .filter(|c| c.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn create_project(&self, new: NewProject) -> Result<TestProject, StoreError> {
        self.ensure_open()?;
        let project = TestProject {
            id: new_id(),
            name: new.name,
            url: new.url,
            created_at: Utc::now(),
            test_runs: new.test_runs,
        };
        let mut t = self.tables.write().await;
        t.project_order.push(project.id.clone());
        t.projects.insert(project.id.clone(), project.clone());
        Ok(project)
    }

    async fn update_project(
        &self,
        id: &str,
        patch: ProjectPatch,
    ) -> Result<TestProject, StoreError> {
        self.ensure_open()?;
        let mut t = self.tables.write().await;
        let project = t
            .projects
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("test project", id))?;
        project.apply(patch);
        Ok(project.clone())
    }

    async fn get_project(&self, id: &str) -> Result<TestProject, StoreError> {
        self.ensure_open()?;
        let t = self.tables.read().await;
        t.projects
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("test project", id))
    }

    async fn list_projects(&self) -> Result<Vec<TestProject>, StoreError> {
        self.ensure_open()?;
        let t = self.tables.read().await;
        Ok(t.project_order
            .iter()
            .rev()
            .filter_map(|id| t.projects.get(id).cloned())
            .collect())
    }

    async fn delete_project(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut t = self.tables.write().await;
        if t.projects.remove(id).is_none() {
            return Err(StoreError::not_found("test project", id));
        }
        t.project_order.retain(|p| p != id);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::model::{CaseStatus, RunStatus};

    fn new_case(run_id: &str, category: Category) -> NewCase {
        NewCase {
            run_id: run_id.to_string(),
            name: category.case_name(),
            category,
            status: CaseStatus::Pass,
            duration: 10,
            logs: vec!["ok".to_string()],
            screenshot: None,
        }
    }

    #[tokio::test]
    async fn test_update_unknown_run_is_not_found() {
        let store = MemoryStore::open();
        let err = store
            .update_run("missing", RunPatch::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cases_listed_in_creation_order() {
        let store = MemoryStore::open();
        let run = store
            .create_run(NewRun {
                project_id: "p".to_string(),
                status: RunStatus::Running,
            })
            .await
            .unwrap();
        let a = store.create_case(new_case(&run.id, Category::Login)).await.unwrap();
        let _other = store.create_case(new_case("other", Category::Forms)).await.unwrap();
        let b = store.create_case(new_case(&run.id, Category::Links)).await.unwrap();

        let ids: Vec<_> = store
            .list_cases_by_run(&run.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_rejected_patch_is_not_applied() {
        let store = MemoryStore::open();
        let run = store
            .create_run(NewRun {
                project_id: "p".to_string(),
                status: RunStatus::Running,
            })
            .await
            .unwrap();
        store
            .update_run(&run.id, RunPatch::finish(RunStatus::Completed, Utc::now()))
            .await
            .unwrap();
        let err = store
            .update_run(
                &run.id,
                RunPatch {
                    status: Some(RunStatus::Failed),
                    test_cases: Some(vec!["x".to_string()]),
                    ..RunPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
        let stored = store.get_run(&run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert!(stored.test_cases.is_empty());
    }

    #[tokio::test]
    async fn test_delete_run_drops_its_cases() {
        let store = MemoryStore::open();
        let run = store
            .create_run(NewRun {
                project_id: "p".to_string(),
                status: RunStatus::Running,
            })
            .await
            .unwrap();
        let case = store.create_case(new_case(&run.id, Category::Login)).await.unwrap();
        store.delete_run(&run.id).await.unwrap();
        assert!(store.get_case(&case.id).await.unwrap_err().is_not_found());
        assert!(store.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = MemoryStore::open();
        store.close().await.unwrap();
        assert!(matches!(
            store.list_runs().await.unwrap_err(),
            StoreError::Closed
        ));
    }
}

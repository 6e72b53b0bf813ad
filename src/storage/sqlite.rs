//! SQLite-backed run store.
//!
//! Queries run on the blocking pool; each call checks out its own pooled
//! connection. Run updates are read-modify-write inside an IMMEDIATE
//! transaction so concurrent writers to the same record serialize.

use super::{new_id, Pool, RunStore, StoreError};
use crate::category::Category;
use crate::model::{
    CaseStatus, NewCase, NewProject, NewRun, ProjectPatch, RunPatch, RunStatus, TestCase,
    TestProject, TestRun,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
    closed: Arc<AtomicBool>,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn get_pool(&self) -> &Pool {
        &self.pool
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut *conn)
        })
        .await?
    }
}

const RUN_COLUMNS: &str = "id, project_id, status, start_time, end_time, test_cases_json";
const CASE_COLUMNS: &str =
    "id, run_id, name, category, status, duration_ms, logs_json, screenshot";
const PROJECT_COLUMNS: &str = "id, name, url, created_at, test_runs_json";

struct RunRow {
    id: String,
    project_id: String,
    status: String,
    start_time: String,
    end_time: Option<String>,
    test_cases_json: String,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            status: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            test_cases_json: row.get(5)?,
        })
    }

    fn into_run(self) -> Result<TestRun, StoreError> {
        let status = RunStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("run status '{}'", self.status)))?;
        Ok(TestRun {
            status,
            start_time: parse_time(&self.start_time)?,
            end_time: self.end_time.as_deref().map(parse_time).transpose()?,
            test_cases: serde_json::from_str(&self.test_cases_json)?,
            id: self.id,
            project_id: self.project_id,
        })
    }
}

struct CaseRow {
    id: String,
    run_id: String,
    name: String,
    category: String,
    status: String,
    duration_ms: i64,
    logs_json: String,
    screenshot: Option<String>,
}

impl CaseRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            status: row.get(4)?,
            duration_ms: row.get(5)?,
            logs_json: row.get(6)?,
            screenshot: row.get(7)?,
        })
    }

    fn into_case(self) -> Result<TestCase, StoreError> {
        let category: Category = self
            .category
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{}", e)))?;
        let status = CaseStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("case status '{}'", self.status)))?;
        Ok(TestCase {
            category,
            status,
            duration: u64::try_from(self.duration_ms)
                .map_err(|_| StoreError::Corrupt(format!("duration {}", self.duration_ms)))?,
            logs: serde_json::from_str(&self.logs_json)?,
            id: self.id,
            run_id: self.run_id,
            name: self.name,
            screenshot: self.screenshot,
        })
    }
}

struct ProjectRow {
    id: String,
    name: String,
    url: String,
    created_at: String,
    test_runs_json: String,
}

impl ProjectRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            created_at: row.get(3)?,
            test_runs_json: row.get(4)?,
        })
    }

    fn into_project(self) -> Result<TestProject, StoreError> {
        Ok(TestProject {
            created_at: parse_time(&self.created_at)?,
            test_runs: serde_json::from_str(&self.test_runs_json)?,
            id: self.id,
            name: self.name,
            url: self.url,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", s, e)))
}

fn load_run(conn: &Connection, id: &str) -> Result<TestRun, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM test_runs WHERE id = ?1", RUN_COLUMNS),
        params![id],
        RunRow::from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("test run", id))?
    .into_run()
}

fn load_project(conn: &Connection, id: &str) -> Result<TestProject, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM test_projects WHERE id = ?1", PROJECT_COLUMNS),
        params![id],
        ProjectRow::from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("test project", id))?
    .into_project()
}

fn query_runs(
    conn: &Connection,
    filter: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<TestRun>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM test_runs {} ORDER BY seq ASC",
        RUN_COLUMNS, filter
    ))?;
    let rows: Vec<RunRow> = stmt
        .query_map(args, RunRow::from_row)?
        .collect::<Result<_, _>>()?;
    rows.into_iter().map(RunRow::into_run).collect()
}

#[async_trait::async_trait]
impl RunStore for SqliteStore {
    async fn create_run(&self, new: NewRun) -> Result<TestRun, StoreError> {
        let start_time = Utc::now();
        let run = TestRun {
            id: new_id(),
            project_id: new.project_id,
            status: new.status,
            start_time,
            end_time: new.status.is_terminal().then_some(start_time),
            test_cases: Vec::new(),
        };
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO test_runs (id, project_id, status, start_time, end_time, test_cases_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run.id,
                    run.project_id,
                    run.status.as_str(),
                    run.start_time.to_rfc3339(),
                    run.end_time.map(|t| t.to_rfc3339()),
                    serde_json::to_string(&run.test_cases)?,
                ],
            )?;
            Ok(run)
        })
        .await
    }

    async fn update_run(&self, id: &str, patch: RunPatch) -> Result<TestRun, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut run = load_run(&tx, &id)?;
            run.apply(patch)?;
            tx.execute(
                "UPDATE test_runs SET status = ?2, end_time = ?3, test_cases_json = ?4 WHERE id = ?1",
                params![
                    run.id,
                    run.status.as_str(),
                    run.end_time.map(|t| t.to_rfc3339()),
                    serde_json::to_string(&run.test_cases)?,
                ],
            )?;
            tx.commit()?;
            Ok(run)
        })
        .await
    }

    async fn get_run(&self, id: &str) -> Result<TestRun, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| load_run(conn, &id)).await
    }

    async fn list_runs(&self) -> Result<Vec<TestRun>, StoreError> {
        self.with_conn(|conn| query_runs(conn, "", [])).await
    }

    async fn list_runs_by_project(&self, project_id: &str) -> Result<Vec<TestRun>, StoreError> {
        let project_id = project_id.to_string();
        self.with_conn(move |conn| query_runs(conn, "WHERE project_id = ?1", params![project_id]))
            .await
    }

    async fn delete_run(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute("DELETE FROM test_runs WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::not_found("test run", &id));
            }
            tx.execute("DELETE FROM test_cases WHERE run_id = ?1", params![id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn create_case(&self, new: NewCase) -> Result<TestCase, StoreError> {
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
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO test_cases (id, run_id, name, category, status, duration_ms, logs_json, screenshot, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    case.id,
                    case.run_id,
                    case.name,
                    case.category.key(),
                    case.status.as_str(),
                    i64::try_from(case.duration).unwrap_or(i64::MAX),
                    serde_json::to_string(&case.logs)?,
                    case.screenshot,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(case)
        })
        .await
    }

    async fn get_case(&self, id: &str) -> Result<TestCase, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM test_cases WHERE id = ?1", CASE_COLUMNS),
                params![id],
                CaseRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("test case", &id))?
            .into_case()
        })
        .await
    }

    async fn list_cases_by_run(&self, run_id: &str) -> Result<Vec<TestCase>, StoreError> {
        let run_id = run_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM test_cases WHERE run_id = ?1 ORDER BY seq ASC",
                CASE_COLUMNS
            ))?;
            let rows: Vec<CaseRow> = stmt
                .query_map(params![run_id], CaseRow::from_row)?
                .collect::<Result<_, _>>()?;
            rows.into_iter().map(CaseRow::into_case).collect()
        })
        .await
    }

    async fn create_project(&self, new: NewProject) -> Result<TestProject, StoreError> {
        let project = TestProject {
            id: new_id(),
            name: new.name,
            url: new.url,
            created_at: Utc::now(),
            test_runs: new.test_runs,
        };
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO test_projects (id, name, url, created_at, test_runs_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    project.id,
                    project.name,
                    project.url,
                    project.created_at.to_rfc3339(),
                    serde_json::to_string(&project.test_runs)?,
                ],
            )?;
            Ok(project)
        })
        .await
    }

    async fn update_project(
        &self,
        id: &str,
        patch: ProjectPatch,
    ) -> Result<TestProject, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut project = load_project(&tx, &id)?;
            project.apply(patch);
            tx.execute(
                "UPDATE test_projects SET name = ?2, url = ?3, test_runs_json = ?4 WHERE id = ?1",
                params![
                    project.id,
                    project.name,
                    project.url,
                    serde_json::to_string(&project.test_runs)?,
                ],
            )?;
            tx.commit()?;
            Ok(project)
        })
        .await
    }

    async fn get_project(&self, id: &str) -> Result<TestProject, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| load_project(conn, &id)).await
    }

    async fn list_projects(&self) -> Result<Vec<TestProject>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM test_projects ORDER BY seq DESC",
                PROJECT_COLUMNS
            ))?;
            let rows: Vec<ProjectRow> = stmt
                .query_map([], ProjectRow::from_row)?
                .collect::<Result<_, _>>()?;
            rows.into_iter().map(ProjectRow::into_project).collect()
        })
        .await
    }

    async fn delete_project(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute("DELETE FROM test_projects WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::not_found("test project", &id));
            }
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_pool;

    fn store(dir: &tempfile::TempDir) -> SqliteStore {
        let path = dir.path().join("runs.db");
        SqliteStore::new(open_pool(&path.to_string_lossy()).unwrap())
    }

    #[tokio::test]
    async fn test_run_roundtrip_through_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let run = store
            .create_run(NewRun {
                project_id: "temp-1".to_string(),
                status: RunStatus::Running,
            })
            .await
            .unwrap();
        assert_eq!(run.end_time, None);

        let updated = store
            .update_run(&run.id, RunPatch::test_cases(vec!["c1".into(), "c2".into()]))
            .await
            .unwrap();
        assert_eq!(updated.test_cases.len(), 2);

        let finished = store
            .update_run(&run.id, RunPatch::finish(RunStatus::Completed, Utc::now()))
            .await
            .unwrap();
        let loaded = store.get_run(&run.id).await.unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.test_cases, vec!["c1".to_string(), "c2".to_string()]);
        assert!(loaded.end_time.is_some());
        assert_eq!(loaded.end_time, finished.end_time);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(store.get_run("nope").await.unwrap_err().is_not_found());
        assert!(store
            .update_run("nope", RunPatch::default())
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store.get_case("nope").await.unwrap_err().is_not_found());
        assert!(store.delete_project("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_case_fields_survive_storage() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let case = store
            .create_case(NewCase {
                run_id: "r1".to_string(),
                name: Category::Links.case_name(),
                category: Category::Links,
                status: CaseStatus::Fail,
                duration: 1234,
                logs: vec!["Navigating to https://example.com/".to_string()],
                screenshot: Some("shot-1".to_string()),
            })
            .await
            .unwrap();

        let cases = store.list_cases_by_run("r1").await.unwrap();
        assert_eq!(cases, vec![case]);
    }

    #[tokio::test]
    async fn test_projects_listed_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let first = store
            .create_project(NewProject {
                name: "a".to_string(),
                url: "https://a.test".to_string(),
                test_runs: vec![],
            })
            .await
            .unwrap();
        let second = store
            .create_project(NewProject {
                name: "b".to_string(),
                url: "https://b.test".to_string(),
                test_runs: vec!["r1".to_string()],
            })
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list_projects()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id.clone()]);

        let renamed = store
            .update_project(
                &first.id,
                ProjectPatch {
                    name: Some("renamed".to_string()),
                    ..ProjectPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "renamed");
        assert_eq!(store.get_project(&first.id).await.unwrap().name, "renamed");
    }
}

//! Run store -- persistence contract for runs, cases, and projects.
//!
//! Two backends ship: an in-process [`MemoryStore`] and a SQLite-backed
//! [`SqliteStore`]. The engine depends only on the [`RunStore`] trait.

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

use crate::config::{StorageBackend, StorageConfig};
use crate::model::{
    InvalidTransition, NewCase, NewProject, NewRun, ProjectPatch, RunPatch, TestCase, TestProject,
    TestRun,
};
use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::sync::Arc;
use thiserror::Error;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("store is closed")]
    Closed,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Persistence contract consumed by the engine and the API.
///
/// Every call may suspend. Implementations serialize writes to the same
/// record; nothing here is transactional across calls.
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, new: NewRun) -> Result<TestRun, StoreError>;

    /// Fails with `NotFound` for unknown ids and `InvalidTransition` for an
    /// illegal status change.
    async fn update_run(&self, id: &str, patch: RunPatch) -> Result<TestRun, StoreError>;

    async fn get_run(&self, id: &str) -> Result<TestRun, StoreError>;

    /// All runs, oldest first.
    async fn list_runs(&self) -> Result<Vec<TestRun>, StoreError>;

    async fn list_runs_by_project(&self, project_id: &str) -> Result<Vec<TestRun>, StoreError>;

    /// Removes the run and its cases.
    async fn delete_run(&self, id: &str) -> Result<(), StoreError>;

    async fn create_case(&self, new: NewCase) -> Result<TestCase, StoreError>;

    async fn get_case(&self, id: &str) -> Result<TestCase, StoreError>;

    /// Cases of one run in creation order.
    async fn list_cases_by_run(&self, run_id: &str) -> Result<Vec<TestCase>, StoreError>;

    async fn create_project(&self, new: NewProject) -> Result<TestProject, StoreError>;

    async fn update_project(
        &self,
        id: &str,
        patch: ProjectPatch,
    ) -> Result<TestProject, StoreError>;

    async fn get_project(&self, id: &str) -> Result<TestProject, StoreError>;

    /// All projects, newest first.
    async fn list_projects(&self) -> Result<Vec<TestProject>, StoreError>;

    async fn delete_project(&self, id: &str) -> Result<(), StoreError>;

    /// Release backend resources. Later calls fail with `Closed`.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Open the backend selected by configuration.
pub fn open(config: &StorageConfig) -> Result<Arc<dyn RunStore>> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory run store");
            Ok(Arc::new(MemoryStore::open()))
        }
        StorageBackend::Sqlite => {
            tracing::info!(path = %config.path.display(), "Initializing database");
            let pool = open_pool(&config.path.to_string_lossy())?;
            Ok(Arc::new(SqliteStore::new(pool)))
        }
    }
}

/// Fresh record id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

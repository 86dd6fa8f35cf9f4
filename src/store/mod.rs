//! PostgreSQL task store: the single source of truth for queued work.
//!
//! All other components read and write task state through this module:
//!
//! - `tasks`: task rows, the atomic claim, terminal transitions, admin ops
//! - `progress`: append-only progress events plus the fast task snapshot
//! - `results`: cached per-phase payloads keyed by document
//! - `servers`: GPU worker registry with heartbeats and capacity

pub mod migrations;
pub mod progress;
pub mod results;
pub mod schema;
pub mod servers;
pub mod tasks;

pub use progress::{ProgressEvent, ProgressTracker};
pub use results::{PhaseResult, ResultCache};
pub use servers::{ServerRegistry, WorkerServer, WorkerStatus};
pub use tasks::{
    NewTask, StatusSnapshot, StuckSweep, Task, TaskOutcome, TaskStatus, TaskStore, TaskSummary,
};

use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use uuid::Uuid;

use migrations::MigrationRunner;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The task is no longer owned by this claim (its status changed
    /// underneath the caller).
    #[error("Stale claim on task {0}: status changed since claim")]
    StaleClaim(Uuid),

    /// A stored value could not be interpreted.
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] migrations::MigrationError),
}

/// Handle to the task store database.
///
/// Cheap to clone; every sub-store shares the same connection pool.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connects to the database and returns a new store.
    ///
    /// # Arguments
    ///
    /// * `database_url` - PostgreSQL connection string
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Creates a store from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let runner = MigrationRunner::new(self.pool.clone());
        runner.run_migrations().await?;
        Ok(())
    }

    /// Task row operations.
    pub fn tasks(&self) -> TaskStore {
        TaskStore::new(self.pool.clone())
    }

    /// Progress event operations.
    pub fn progress(&self) -> ProgressTracker {
        ProgressTracker::new(self.pool.clone())
    }

    /// Cached phase result operations.
    pub fn results(&self) -> ResultCache {
        ResultCache::new(self.pool.clone())
    }

    /// Worker registry operations.
    pub fn servers(&self) -> ServerRegistry {
        ServerRegistry::new(self.pool.clone())
    }
}

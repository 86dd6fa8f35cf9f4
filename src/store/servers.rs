//! GPU worker registry.
//!
//! Worker rows are written by the workers themselves (heartbeat) and by
//! the health monitor (marking dead); the scheduler only reads them, to
//! decide whether there is spare capacity before claiming a task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::StoreError;

/// Availability status of a worker server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Accepting new phase dispatches.
    Available,
    /// At capacity.
    Busy,
    /// Heartbeat expired; excluded from dispatch.
    Unavailable,
}

impl WorkerStatus {
    /// Returns the wire/database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Available => "available",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Unavailable => "unavailable",
        }
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(WorkerStatus::Available),
            "busy" => Ok(WorkerStatus::Busy),
            "unavailable" => Ok(WorkerStatus::Unavailable),
            other => Err(format!("unknown worker status '{}'", other)),
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One registered worker process.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerServer {
    /// Worker identifier (stable across heartbeats).
    pub server_id: String,
    /// Worker class (e.g. `gpu`).
    pub server_type: String,
    /// Availability status.
    pub status: WorkerStatus,
    /// Tasks the worker is currently running.
    pub current_load: i32,
    /// Maximum tasks the worker accepts concurrently.
    pub max_concurrent_tasks: i32,
    /// Base URL phase dispatches are sent to.
    pub endpoint_url: String,
    /// Last liveness signal.
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerServer {
    /// Returns whether the worker has spare capacity.
    pub fn has_capacity(&self) -> bool {
        self.status != WorkerStatus::Unavailable && self.current_load < self.max_concurrent_tasks
    }
}

/// Heartbeat payload posted by a worker.
#[derive(Debug, Clone, Deserialize)]
pub struct Heartbeat {
    /// Worker identifier.
    pub server_id: String,
    /// Worker class.
    pub server_type: String,
    /// Base URL phase dispatches are sent to.
    pub endpoint_url: String,
    /// Tasks the worker is currently running.
    pub current_load: i32,
    /// Maximum tasks the worker accepts concurrently.
    pub max_concurrent_tasks: i32,
}

/// Worker registry operations.
#[derive(Clone)]
pub struct ServerRegistry {
    pool: PgPool,
}

impl ServerRegistry {
    /// Creates a registry over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records a worker heartbeat, inserting the row on first contact.
    ///
    /// Status is derived from load: a worker at capacity is `busy`,
    /// otherwise `available`. A heartbeat always clears `unavailable`.
    pub async fn heartbeat(&self, beat: &Heartbeat) -> Result<WorkerServer, StoreError> {
        let status = if beat.current_load >= beat.max_concurrent_tasks {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Available
        };

        let row = sqlx::query(
            r#"
            INSERT INTO worker_servers
                (server_id, server_type, status, current_load, max_concurrent_tasks, endpoint_url, last_heartbeat)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (server_id) DO UPDATE SET
                server_type = EXCLUDED.server_type,
                status = EXCLUDED.status,
                current_load = EXCLUDED.current_load,
                max_concurrent_tasks = EXCLUDED.max_concurrent_tasks,
                endpoint_url = EXCLUDED.endpoint_url,
                last_heartbeat = NOW()
            RETURNING server_id, server_type, status, current_load, max_concurrent_tasks, endpoint_url, last_heartbeat
            "#,
        )
        .bind(&beat.server_id)
        .bind(&beat.server_type)
        .bind(status.as_str())
        .bind(beat.current_load)
        .bind(beat.max_concurrent_tasks)
        .bind(&beat.endpoint_url)
        .fetch_one(&self.pool)
        .await?;

        worker_from_row(&row)
    }

    /// Picks the least-loaded worker with spare capacity and a fresh
    /// heartbeat, or `None` when the pool is saturated or dead.
    pub async fn pick_available(
        &self,
        heartbeat_timeout: Duration,
    ) -> Result<Option<WorkerServer>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT server_id, server_type, status, current_load, max_concurrent_tasks, endpoint_url, last_heartbeat
            FROM worker_servers
            WHERE status <> 'unavailable'
              AND current_load < max_concurrent_tasks
              AND last_heartbeat > NOW() - make_interval(secs => $1)
            ORDER BY current_load ASC, last_heartbeat DESC
            LIMIT 1
            "#,
        )
        .bind(heartbeat_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(worker_from_row).transpose()
    }

    /// Marks workers with expired heartbeats unavailable.
    ///
    /// Returns the IDs of the workers transitioned by this sweep.
    pub async fn mark_stale_unavailable(
        &self,
        heartbeat_timeout: Duration,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE worker_servers
            SET status = 'unavailable'
            WHERE status <> 'unavailable'
              AND last_heartbeat < NOW() - make_interval(secs => $1)
            RETURNING server_id
            "#,
        )
        .bind(heartbeat_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("server_id")).collect())
    }

    /// Lists all registered workers.
    pub async fn list(&self) -> Result<Vec<WorkerServer>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT server_id, server_type, status, current_load, max_concurrent_tasks, endpoint_url, last_heartbeat
            FROM worker_servers
            ORDER BY server_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(worker_from_row).collect()
    }
}

/// Maps a database row to a `WorkerServer`.
fn worker_from_row(row: &PgRow) -> Result<WorkerServer, StoreError> {
    let status: String = row.get("status");
    let status = status
        .parse::<WorkerStatus>()
        .map_err(StoreError::InvalidValue)?;

    Ok(WorkerServer {
        server_id: row.get("server_id"),
        server_type: row.get("server_type"),
        status,
        current_load: row.get("current_load"),
        max_concurrent_tasks: row.get("max_concurrent_tasks"),
        endpoint_url: row.get("endpoint_url"),
        last_heartbeat: row.get("last_heartbeat"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_worker() -> WorkerServer {
        WorkerServer {
            server_id: "gpu-01".to_string(),
            server_type: "gpu".to_string(),
            status: WorkerStatus::Available,
            current_load: 1,
            max_concurrent_tasks: 4,
            endpoint_url: "http://gpu-01:9000".to_string(),
            last_heartbeat: Utc::now(),
        }
    }

    #[test]
    fn test_worker_status_roundtrip() {
        for status in [
            WorkerStatus::Available,
            WorkerStatus::Busy,
            WorkerStatus::Unavailable,
        ] {
            let parsed: WorkerStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_worker_has_capacity() {
        let worker = sample_worker();
        assert!(worker.has_capacity());
    }

    #[test]
    fn test_worker_at_capacity() {
        let mut worker = sample_worker();
        worker.current_load = 4;
        assert!(!worker.has_capacity());
    }

    #[test]
    fn test_unavailable_worker_has_no_capacity() {
        let mut worker = sample_worker();
        worker.status = WorkerStatus::Unavailable;
        worker.current_load = 0;
        assert!(!worker.has_capacity());
    }
}

//! Cached per-phase result payloads.
//!
//! Phase outputs are keyed by `(document_id, phase)`, not by attempt, so
//! a reprocessing run must clear a document's cached rows before phase 1
//! restarts; otherwise stale and fresh artifacts would mix.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::StoreError;

/// One cached phase output.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    /// Document the payload belongs to.
    pub document_id: Uuid,
    /// Phase that produced the payload.
    pub phase: String,
    /// Raw result payload from the worker.
    pub payload: serde_json::Value,
    /// When the payload was stored.
    pub created_at: DateTime<Utc>,
}

/// Phase result cache operations.
#[derive(Clone)]
pub struct ResultCache {
    pool: PgPool,
}

impl ResultCache {
    /// Creates a result cache over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stores a phase payload, replacing any previous payload for the same
    /// document and phase.
    pub async fn store_phase(
        &self,
        document_id: Uuid,
        phase: &str,
        payload: &serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO phase_results (document_id, phase, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (document_id, phase) DO UPDATE SET
                payload = EXCLUDED.payload,
                created_at = NOW()
            "#,
        )
        .bind(document_id)
        .bind(phase)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieves all cached phase results for a document, oldest first.
    pub async fn fetch_document(&self, document_id: Uuid) -> Result<Vec<PhaseResult>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, phase, payload, created_at
            FROM phase_results
            WHERE document_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let results = rows
            .into_iter()
            .map(|row| PhaseResult {
                document_id: row.get("document_id"),
                phase: row.get("phase"),
                payload: row.get("payload"),
                created_at: row.get("created_at"),
            })
            .collect();

        Ok(results)
    }

    /// Clears all cached results for a document.
    ///
    /// Called before a retry attempt redoes the pipeline from phase 1.
    /// Returns the number of rows removed.
    pub async fn clear_document(&self, document_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM phase_results WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

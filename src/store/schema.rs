//! Database schema constants.
//!
//! This module contains all SQL schema definitions for the PostgreSQL
//! task store.

/// SQL schema for creating the processing_tasks table.
pub const CREATE_PROCESSING_TASKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS processing_tasks (
    id UUID PRIMARY KEY,
    document_id UUID NOT NULL,
    task_type VARCHAR(100) NOT NULL DEFAULT 'pdf_analysis',
    status VARCHAR(20) NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 0,
    file_path VARCHAR(1024) NOT NULL,
    current_step VARCHAR(100),
    progress_percentage SMALLINT NOT NULL DEFAULT 0,
    progress_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    next_retry_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    company_id UUID
)
"#;

/// SQL schema for creating the progress_events table.
pub const CREATE_PROGRESS_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS progress_events (
    id BIGSERIAL PRIMARY KEY,
    task_id UUID NOT NULL REFERENCES processing_tasks(id) ON DELETE CASCADE,
    step_name VARCHAR(100) NOT NULL,
    step_status VARCHAR(20) NOT NULL,
    progress_percentage SMALLINT NOT NULL,
    message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL schema for creating the worker_servers table.
pub const CREATE_WORKER_SERVERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS worker_servers (
    server_id VARCHAR(255) PRIMARY KEY,
    server_type VARCHAR(100) NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'available',
    current_load INTEGER NOT NULL DEFAULT 0,
    max_concurrent_tasks INTEGER NOT NULL DEFAULT 1,
    endpoint_url VARCHAR(1024) NOT NULL,
    last_heartbeat TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL schema for creating the phase_results table.
///
/// Cached phase payloads are keyed by document, not by attempt, so a retry
/// must clear them before redoing the pipeline.
pub const CREATE_PHASE_RESULTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS phase_results (
    id BIGSERIAL PRIMARY KEY,
    document_id UUID NOT NULL,
    phase VARCHAR(100) NOT NULL,
    payload JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE(document_id, phase)
)
"#;

/// Index creation statements, one per statement so each runs as its own
/// prepared query.
pub const CREATE_INDEXES: [&str; 5] = [
    r#"CREATE INDEX IF NOT EXISTS idx_processing_tasks_claim
        ON processing_tasks(status, priority DESC, created_at)"#,
    "CREATE INDEX IF NOT EXISTS idx_processing_tasks_document_id ON processing_tasks(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_processing_tasks_company_id ON processing_tasks(company_id)",
    "CREATE INDEX IF NOT EXISTS idx_progress_events_task_id ON progress_events(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_phase_results_document_id ON phase_results(document_id)",
];

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut statements = vec![
        CREATE_PROCESSING_TASKS_TABLE,
        CREATE_PROGRESS_EVENTS_TABLE,
        CREATE_WORKER_SERVERS_TABLE,
        CREATE_PHASE_RESULTS_TABLE,
    ];
    statements.extend(CREATE_INDEXES);
    statements
}

/// Table names in the schema.
pub mod tables {
    /// Processing tasks table name.
    pub const PROCESSING_TASKS: &str = "processing_tasks";
    /// Progress events table name.
    pub const PROGRESS_EVENTS: &str = "progress_events";
    /// Worker servers table name.
    pub const WORKER_SERVERS: &str = "worker_servers";
    /// Phase results table name.
    pub const PHASE_RESULTS: &str = "phase_results";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_schema_statements_order() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 9);
        // processing_tasks must come first (progress_events references it)
        assert!(statements[0].contains("processing_tasks"));
        // Indexes should be last
        assert!(statements[4].contains("CREATE INDEX"));
        assert!(statements[8].contains("CREATE INDEX"));
    }

    #[test]
    fn test_index_statements_are_single_statements() {
        for statement in CREATE_INDEXES {
            assert!(!statement.trim_end().trim_end_matches(';').contains(';'));
        }
    }

    #[test]
    fn test_table_constants() {
        assert_eq!(tables::PROCESSING_TASKS, "processing_tasks");
        assert_eq!(tables::PROGRESS_EVENTS, "progress_events");
        assert_eq!(tables::WORKER_SERVERS, "worker_servers");
        assert_eq!(tables::PHASE_RESULTS, "phase_results");
    }
}

//! Database schema for sites, performance rows and sync progress.
//!
//! Statements are idempotent and executed one at a time, so the same list
//! serves the `migrate` command and the integration test containers.

use sqlx::PgPool;
use tracing::debug;

use gsc_sync_core::error::AppError;

/// Name of the partial unique index that allows one active job at a time.
pub const ACTIVE_JOB_INDEX: &str = "uq_sync_jobs_single_active";

/// Schema statements in dependency order.
pub const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS sites (
        id BIGSERIAL PRIMARY KEY,
        site_url TEXT NOT NULL UNIQUE,
        label TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sync_jobs (
        id BIGSERIAL PRIMARY KEY,
        site_id BIGINT,
        status VARCHAR(16) NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'running', 'success', 'error')),
        total_tasks INTEGER NOT NULL DEFAULT 0,
        completed_tasks INTEGER NOT NULL DEFAULT 0,
        started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        finished_at TIMESTAMPTZ,
        error_message TEXT,
        pid INTEGER,
        log_file TEXT
    )"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS uq_sync_jobs_single_active
        ON sync_jobs ((status IN ('pending', 'running')))
        WHERE status IN ('pending', 'running')"#,
    r#"CREATE TABLE IF NOT EXISTS sync_task_runs (
        id BIGSERIAL PRIMARY KEY,
        job_id BIGINT REFERENCES sync_jobs(id) ON DELETE CASCADE,
        site_id BIGINT NOT NULL REFERENCES sites(id),
        search_type VARCHAR(16) NOT NULL,
        date_from DATE NOT NULL,
        date_to DATE NOT NULL,
        status VARCHAR(16) NOT NULL DEFAULT 'running'
            CHECK (status IN ('running', 'success', 'empty', 'error')),
        total_chunks INTEGER NOT NULL DEFAULT 0,
        done_chunks INTEGER NOT NULL DEFAULT 0,
        rows_fetched BIGINT NOT NULL DEFAULT 0,
        rows_inserted BIGINT NOT NULL DEFAULT 0,
        rows_new BIGINT NOT NULL DEFAULT 0,
        rows_updated BIGINT NOT NULL DEFAULT 0,
        duration_sec DOUBLE PRECISION NOT NULL DEFAULT 0,
        error_message TEXT,
        started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        finished_at TIMESTAMPTZ
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_task_runs_resume ON sync_task_runs(site_id, search_type, status, date_to DESC)",
    "CREATE INDEX IF NOT EXISTS idx_task_runs_job ON sync_task_runs(job_id, status)",
    r#"CREATE TABLE IF NOT EXISTS performance_rows (
        site_id BIGINT NOT NULL REFERENCES sites(id),
        data_date DATE NOT NULL,
        page TEXT NOT NULL,
        query TEXT NOT NULL,
        country VARCHAR(8) NOT NULL,
        device VARCHAR(16) NOT NULL,
        search_type VARCHAR(16) NOT NULL,
        clicks BIGINT NOT NULL DEFAULT 0,
        impressions BIGINT NOT NULL DEFAULT 0,
        ctr DOUBLE PRECISION NOT NULL DEFAULT 0,
        position DOUBLE PRECISION NOT NULL DEFAULT 0,
        PRIMARY KEY (site_id, data_date, page, query, country, device, search_type)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_performance_rows_task ON performance_rows(site_id, search_type, data_date)",
];

/// Applies every schema statement in order.
pub async fn apply_schema(pool: &PgPool) -> Result<(), AppError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!(statements = SCHEMA.len(), "Schema applied");
    Ok(())
}

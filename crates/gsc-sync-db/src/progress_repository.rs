//! Job and task-run persistence for PostgreSQL.
//!
//! Implements [`ProgressStore`]. Every state-changing statement is guarded
//! by the current status (`pending`/`running` for jobs, `running` for task
//! runs), so a terminal row is never modified again and late writes from a
//! killed worker fall through as no-ops.
//!
//! Single-active-job exclusion is enforced by the partial unique index
//! [`ACTIVE_JOB_INDEX`]; a violation surfaces as
//! [`AppError::ActiveJobExists`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Pool, Postgres};
use tracing::{debug, warn};

use gsc_sync_core::config::SearchType;
use gsc_sync_core::error::AppError;
use gsc_sync_core::job::{Job, JobStatus, NewTaskRun, TaskCompletion, TaskRun, TaskStatus};
use gsc_sync_core::traits::ProgressStore;

use crate::schema::ACTIVE_JOB_INDEX;

/// PostgreSQL store for sync jobs and their task runs.
#[derive(Clone)]
pub struct ProgressRepository {
    pool: Pool<Postgres>,
}

impl ProgressRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

const JOB_COLUMNS: &str = "id, site_id, status, total_tasks, completed_tasks, \
    started_at, finished_at, error_message, pid, log_file";

/// Task-run columns joined with the owning site's URL.
const TASK_RUN_SELECT: &str = "SELECT r.id, r.job_id, r.site_id, s.site_url, r.search_type, \
    r.date_from, r.date_to, r.status, r.total_chunks, r.done_chunks, r.rows_fetched, \
    r.rows_inserted, r.rows_new, r.rows_updated, r.duration_sec, r.error_message, \
    r.started_at, r.finished_at \
    FROM sync_task_runs r JOIN sites s ON s.id = r.site_id";

/// Counts a run finished by the `finished` CTE on its owning job, in the
/// same statement as the terminal write.
const ADVANCE_OWNING_JOB: &str = "UPDATE sync_jobs j \
    SET completed_tasks = LEAST(j.completed_tasks + 1, j.total_tasks) \
    FROM finished f \
    WHERE j.id = f.job_id AND j.status IN ('pending', 'running')";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    site_id: Option<i64>,
    status: String,
    total_tasks: i32,
    completed_tasks: i32,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    pid: Option<i32>,
    log_file: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e| corrupt_row("sync job", row.id, e))?;

        Ok(Self {
            id: row.id,
            site_id: row.site_id,
            status,
            total_tasks: row.total_tasks,
            completed_tasks: row.completed_tasks,
            started_at: row.started_at,
            finished_at: row.finished_at,
            error_message: row.error_message,
            pid: row.pid,
            log_file: row.log_file.map(PathBuf::from),
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRunRow {
    id: i64,
    job_id: Option<i64>,
    site_id: i64,
    site_url: String,
    search_type: String,
    date_from: NaiveDate,
    date_to: NaiveDate,
    status: String,
    total_chunks: i32,
    done_chunks: i32,
    rows_fetched: i64,
    rows_inserted: i64,
    rows_new: i64,
    rows_updated: i64,
    duration_sec: f64,
    error_message: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRunRow> for TaskRun {
    type Error = AppError;

    fn try_from(row: TaskRunRow) -> Result<Self, Self::Error> {
        let search_type: SearchType = row
            .search_type
            .parse()
            .map_err(|e| corrupt_row("task run", row.id, e))?;
        let status: TaskStatus = row
            .status
            .parse()
            .map_err(|e| corrupt_row("task run", row.id, e))?;

        Ok(Self {
            id: row.id,
            job_id: row.job_id,
            site_id: row.site_id,
            site_url: row.site_url,
            search_type,
            date_from: row.date_from,
            date_to: row.date_to,
            status,
            total_chunks: row.total_chunks,
            done_chunks: row.done_chunks,
            rows_fetched: row.rows_fetched,
            rows_inserted: row.rows_inserted,
            rows_new: row.rows_new,
            rows_updated: row.rows_updated,
            duration_sec: row.duration_sec,
            error_message: row.error_message,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

/// A stored value outside its domain; surfaced instead of guessed.
fn corrupt_row(kind: &str, id: i64, err: impl std::fmt::Display) -> AppError {
    warn!(kind, id, error = %err, "Unreadable row");
    AppError::Generic(format!("{kind} {id}: {err}"))
}

fn job_from_row(row: Option<JobRow>) -> Result<Option<Job>, AppError> {
    row.map(Job::try_from).transpose()
}

fn task_runs_from_rows(rows: Vec<TaskRunRow>) -> Result<Vec<TaskRun>, AppError> {
    rows.into_iter().map(TaskRun::try_from).collect()
}

/// Maps a violation of the single-active-job index to its domain error.
fn map_create_error(err: sqlx::Error) -> AppError {
    let constraint = err.as_database_error().and_then(|db| db.constraint());
    if constraint == Some(ACTIVE_JOB_INDEX) {
        AppError::ActiveJobExists
    } else {
        AppError::DatabaseError(err)
    }
}

// =============================================================================
// ProgressStore Trait Implementation
// =============================================================================

impl ProgressStore for ProgressRepository {
    async fn create_job(&self, site_id: Option<i64>) -> Result<Job, AppError> {
        let query = format!(
            "INSERT INTO sync_jobs (site_id, status, started_at) \
             VALUES ($1, 'pending', NOW()) RETURNING {JOB_COLUMNS}"
        );
        let row: JobRow = sqlx::query_as(&query)
            .bind(site_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_create_error)?;

        debug!(job_id = row.id, ?site_id, "Created sync job");
        row.try_into()
    }

    async fn find_job(&self, job_id: i64) -> Result<Option<Job>, AppError> {
        let query = format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE id = $1");
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        job_from_row(row)
    }

    async fn find_active_job(&self) -> Result<Option<Job>, AppError> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM sync_jobs \
             WHERE status IN ('pending', 'running') \
             ORDER BY id DESC LIMIT 1"
        );
        let row: Option<JobRow> = sqlx::query_as(&query)
            .fetch_optional(&self.pool)
            .await?;

        job_from_row(row)
    }

    async fn start_job(&self, job_id: i64, total_tasks: i32) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'running', total_tasks = $2, completed_tasks = 0
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(job_id)
        .bind(total_tasks.max(0))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn advance_job(&self, job_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE sync_jobs
            SET completed_tasks = LEAST(completed_tasks + 1, total_tasks)
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn succeed_job(&self, job_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'success', finished_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_job(&self, job_id: i64, message: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'error', error_message = $2, finished_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(job_id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(job_id, "Job already terminal, failure ignored");
        }
        Ok(())
    }

    async fn set_job_pid(&self, job_id: i64, pid: i32) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE sync_jobs SET pid = $2 WHERE id = $1 AND status IN ('pending', 'running')",
        )
        .bind(job_id)
        .bind(pid)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_job_log_file(&self, job_id: i64, path: &Path) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE sync_jobs SET log_file = $2 WHERE id = $1 AND status IN ('pending', 'running')",
        )
        .bind(job_id)
        .bind(path.to_string_lossy().into_owned())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn start_task(&self, task: &NewTaskRun) -> Result<i64, AppError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sync_task_runs (job_id, site_id, search_type, date_from, date_to, status, started_at)
            VALUES ($1, $2, $3, $4, $5, 'running', NOW())
            RETURNING id
            "#,
        )
        .bind(task.job_id)
        .bind(task.site_id)
        .bind(task.search_type.as_str())
        .bind(task.date_from)
        .bind(task.date_to)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn set_task_chunks(&self, task_id: i64, total_chunks: i32) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE sync_task_runs
            SET total_chunks = $2, done_chunks = 0
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(task_id)
        .bind(total_chunks.max(0))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn advance_task_chunk(&self, task_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE sync_task_runs
            SET done_chunks = LEAST(done_chunks + 1, total_chunks)
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn succeed_task(
        &self,
        task_id: i64,
        completion: &TaskCompletion,
    ) -> Result<(), AppError> {
        let query = format!(
            "WITH finished AS (
                UPDATE sync_task_runs
                SET status = 'success',
                    rows_fetched = $2,
                    rows_inserted = $3,
                    rows_new = $4,
                    rows_updated = $5,
                    duration_sec = $6,
                    date_to = COALESCE($7, date_to),
                    finished_at = NOW()
                WHERE id = $1 AND status = 'running'
                RETURNING job_id
            )
            {ADVANCE_OWNING_JOB}"
        );
        sqlx::query(&query)
            .bind(task_id)
            .bind(completion.rows_fetched)
            .bind(completion.rows_inserted())
            .bind(completion.rows_new)
            .bind(completion.rows_updated)
            .bind(completion.duration_sec)
            .bind(completion.effective_date_to)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_task_empty(&self, task_id: i64, duration_sec: f64) -> Result<(), AppError> {
        let query = format!(
            "WITH finished AS (
                UPDATE sync_task_runs
                SET status = 'empty',
                    rows_fetched = 0,
                    rows_inserted = 0,
                    rows_new = 0,
                    rows_updated = 0,
                    duration_sec = $2,
                    finished_at = NOW()
                WHERE id = $1 AND status = 'running'
                RETURNING job_id
            )
            {ADVANCE_OWNING_JOB}"
        );
        sqlx::query(&query)
            .bind(task_id)
            .bind(duration_sec)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fail_task(
        &self,
        task_id: i64,
        message: &str,
        duration_sec: f64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE sync_task_runs
            SET status = 'error', error_message = $2, duration_sec = $3, finished_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(task_id)
        .bind(message)
        .bind(duration_sec)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_running_task(&self, job_id: i64) -> Result<Option<TaskRun>, AppError> {
        let query = format!(
            "{TASK_RUN_SELECT} WHERE r.job_id = $1 AND r.status = 'running' \
             ORDER BY r.id DESC LIMIT 1"
        );
        let row: Option<TaskRunRow> = sqlx::query_as(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TaskRun::try_from).transpose()
    }

    async fn completed_tasks(&self, job_id: i64) -> Result<Vec<TaskRun>, AppError> {
        let query = format!(
            "{TASK_RUN_SELECT} WHERE r.job_id = $1 AND r.status IN ('success', 'empty', 'error') \
             ORDER BY r.id ASC"
        );
        let rows: Vec<TaskRunRow> = sqlx::query_as(&query)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        task_runs_from_rows(rows)
    }

    async fn last_success(
        &self,
        site_id: i64,
        search_type: SearchType,
    ) -> Result<Option<TaskRun>, AppError> {
        let query = format!(
            "{TASK_RUN_SELECT} WHERE r.site_id = $1 AND r.search_type = $2 \
             AND r.status = 'success' ORDER BY r.date_to DESC, r.id DESC LIMIT 1"
        );
        let row: Option<TaskRunRow> = sqlx::query_as(&query)
            .bind(site_id)
            .bind(search_type.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TaskRun::try_from).transpose()
    }

    async fn recent_tasks(&self, limit: i64) -> Result<Vec<TaskRun>, AppError> {
        let query = format!("{TASK_RUN_SELECT} ORDER BY r.id DESC LIMIT $1");
        let rows: Vec<TaskRunRow> = sqlx::query_as(&query)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;

        task_runs_from_rows(rows)
    }
}

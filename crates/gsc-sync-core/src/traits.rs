//! Trait definitions for external collaborators.
//!
//! The sync engine never talks to the network, the database or the OS process
//! table directly. It is generic over these traits so that:
//!
//! - **Testability**: in-memory mocks drive the coordinator deterministically
//! - **Decoupling**: the PostgreSQL and HTTP adapters live in their own crates
//!
//! # Example
//!
//! ```
//! use gsc_sync_core::traits::ProgressStore;
//!
//! // Business logic uses traits, not concrete types
//! async fn active_job_id<P: ProgressStore>(
//!     progress: &P,
//! ) -> Result<Option<i64>, gsc_sync_core::AppError> {
//!     Ok(progress.find_active_job().await?.map(|job| job.id))
//! }
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};

use crate::config::SearchType;
use crate::error::AppError;
use crate::fetch::AnalyticsQuery;
use crate::job::{Job, NewTaskRun, TaskCompletion, TaskRun};
use crate::models::{PerformanceRow, ProviderSite, Site, StoredDataSummary, UpsertCounts};

/// The external reporting API.
pub trait AnalyticsProvider: Send + Sync + Clone {
    /// Lists the properties the credentials can read.
    fn list_sites(&self) -> impl Future<Output = Result<Vec<ProviderSite>, AppError>> + Send;

    /// Executes one page request.
    ///
    /// Errors must carry a status class so the caller can distinguish
    /// retryable failures (see [`AppError::is_retryable`]).
    fn query(
        &self,
        query: &AnalyticsQuery,
    ) -> impl Future<Output = Result<Vec<PerformanceRow>, AppError>> + Send;
}

/// Storage of tracked sites.
pub trait SiteStore: Send + Sync + Clone {
    /// Inserts a site by URL or returns the existing one.
    ///
    /// The label defaults to the URL on insert; an existing site's label is
    /// only replaced when `label` is given.
    fn upsert_site(
        &self,
        site_url: &str,
        label: Option<&str>,
    ) -> impl Future<Output = Result<Site, AppError>> + Send;

    fn find_site(&self, id: i64) -> impl Future<Output = Result<Option<Site>, AppError>> + Send;

    /// Active sites ordered by URL.
    fn active_sites(&self) -> impl Future<Output = Result<Vec<Site>, AppError>> + Send;
}

/// Storage of performance rows, keyed by their natural key.
pub trait PerformanceStore: Send + Sync + Clone {
    /// Inserts or updates every row in one atomic unit.
    ///
    /// Returns exact counts of first insertions and metric updates. Any
    /// failure rolls back the whole batch.
    fn upsert_batch(
        &self,
        site_id: i64,
        search_type: SearchType,
        rows: &[PerformanceRow],
    ) -> impl Future<Output = Result<UpsertCounts, AppError>> + Send;

    /// Row count, date bounds and distinct dates stored for one task.
    fn summarize(
        &self,
        site_id: i64,
        search_type: SearchType,
    ) -> impl Future<Output = Result<StoredDataSummary, AppError>> + Send;
}

/// Persisted job / task-run progress.
///
/// Single writer per job (its worker), many readers (pollers). Transitions
/// out of a terminal state must be ignored by implementations.
pub trait ProgressStore: Send + Sync + Clone {
    // --- jobs -------------------------------------------------------------

    /// Creates a pending job with `started_at = now`.
    ///
    /// Returns [`AppError::ActiveJobExists`] when the store can detect that
    /// another job is already pending or running.
    fn create_job(
        &self,
        site_id: Option<i64>,
    ) -> impl Future<Output = Result<Job, AppError>> + Send;

    fn find_job(&self, job_id: i64) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    /// Newest job in pending or running state.
    fn find_active_job(&self) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    /// Moves the job to running with its task count.
    fn start_job(
        &self,
        job_id: i64,
        total_tasks: i32,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Increments `completed_tasks`, never past `total_tasks`.
    fn advance_job(&self, job_id: i64) -> impl Future<Output = Result<(), AppError>> + Send;

    fn succeed_job(&self, job_id: i64) -> impl Future<Output = Result<(), AppError>> + Send;

    fn fail_job(
        &self,
        job_id: i64,
        message: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn set_job_pid(&self, job_id: i64, pid: i32)
    -> impl Future<Output = Result<(), AppError>> + Send;

    fn set_job_log_file(
        &self,
        job_id: i64,
        path: &Path,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    // --- task runs --------------------------------------------------------

    /// Creates a running task run and returns its id.
    fn start_task(&self, task: &NewTaskRun)
    -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Records the chunk count and resets `done_chunks`.
    fn set_task_chunks(
        &self,
        task_id: i64,
        total_chunks: i32,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Increments `done_chunks`, never past `total_chunks`.
    fn advance_task_chunk(&self, task_id: i64)
    -> impl Future<Output = Result<(), AppError>> + Send;

    /// Marks the run successful; `effective_date_to` narrows `date_to`.
    ///
    /// The owning job, if any, is advanced as in [`advance_job`] in the same
    /// atomic unit, so no reader sees the run finished while the job still
    /// counts it as outstanding. Nothing changes when the run is not running.
    ///
    /// [`advance_job`]: ProgressStore::advance_job
    fn succeed_task(
        &self,
        task_id: i64,
        completion: &TaskCompletion,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Marks the run empty with zeroed row counters. `date_to` is untouched.
    ///
    /// Advances the owning job atomically, like [`succeed_task`].
    ///
    /// [`succeed_task`]: ProgressStore::succeed_task
    fn mark_task_empty(
        &self,
        task_id: i64,
        duration_sec: f64,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn fail_task(
        &self,
        task_id: i64,
        message: &str,
        duration_sec: f64,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// The newest running task run of a job.
    fn find_running_task(
        &self,
        job_id: i64,
    ) -> impl Future<Output = Result<Option<TaskRun>, AppError>> + Send;

    /// Terminal task runs of a job in creation order.
    fn completed_tasks(
        &self,
        job_id: i64,
    ) -> impl Future<Output = Result<Vec<TaskRun>, AppError>> + Send;

    /// The successful run with the greatest `date_to` for a task.
    fn last_success(
        &self,
        site_id: i64,
        search_type: SearchType,
    ) -> impl Future<Output = Result<Option<TaskRun>, AppError>> + Send;

    /// Most recent task runs, newest first.
    fn recent_tasks(&self, limit: i64) -> impl Future<Output = Result<Vec<TaskRun>, AppError>> + Send;
}

// =============================================================================
// Process Host
// =============================================================================

/// Result of a process-existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// The check was inconclusive; callers must treat this as alive.
    Unknown,
}

/// Capability to check on and signal OS processes.
pub trait LivenessProbe: Send + Sync {
    fn probe(&self, pid: i32) -> Liveness;

    /// Sends a graceful termination request. Returns true if it was delivered.
    fn terminate(&self, pid: i32) -> bool;
}

/// What a launcher needs to start a detached worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub job_id: i64,
    pub site_id: Option<i64>,
    /// File the worker's stdout and stderr are appended to.
    pub log_file: PathBuf,
}

/// A worker that runs (or ran) on behalf of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: i64,
    pub pid: Option<i32>,
    pub log_file: Option<PathBuf>,
}

impl JobHandle {
    /// Rebuilds the handle from what the job recorded.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            pid: job.pid.filter(|pid| *pid > 0),
            log_file: job.log_file.clone(),
        }
    }

    /// Liveness of the worker; `Unknown` when no process id was recorded.
    pub fn liveness<L: LivenessProbe>(&self, probe: &L) -> Liveness {
        match self.pid {
            Some(pid) => probe.probe(pid),
            None => Liveness::Unknown,
        }
    }

    /// Asks the worker to stop. Returns true if a signal was delivered.
    ///
    /// Only a worker known to be dead is skipped; an inconclusive probe still
    /// gets the signal.
    pub fn terminate<L: LivenessProbe>(&self, probe: &L) -> bool {
        match self.pid {
            Some(pid) if probe.probe(pid) != Liveness::Dead => probe.terminate(pid),
            _ => false,
        }
    }
}

/// Capability to start a detached worker process for a job.
///
/// The worker must outlive the caller.
pub trait JobLauncher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<JobHandle, AppError>;
}

//! Progress poll view for external observers.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::config::SearchType;
use crate::error::AppError;
use crate::job::{Job, JobStatus, TaskRun, TaskStatus};
use crate::monitor::LivenessMonitor;
use crate::traits::{LivenessProbe, ProgressStore};

/// The running task of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentTask {
    pub task_run_id: i64,
    pub site_url: String,
    pub search_type: SearchType,
    pub total_chunks: i32,
    pub done_chunks: i32,
}

impl From<&TaskRun> for CurrentTask {
    fn from(run: &TaskRun) -> Self {
        Self {
            task_run_id: run.id,
            site_url: run.site_url.clone(),
            search_type: run.search_type,
            total_chunks: run.total_chunks,
            done_chunks: run.done_chunks,
        }
    }
}

/// A finished task of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedTask {
    pub site_url: String,
    pub search_type: SearchType,
    pub status: TaskStatus,
    pub rows_fetched: i64,
    pub rows_new: i64,
    pub rows_updated: i64,
    pub duration_sec: f64,
}

impl From<TaskRun> for CompletedTask {
    fn from(run: TaskRun) -> Self {
        Self {
            site_url: run.site_url,
            search_type: run.search_type,
            status: run.status,
            rows_fetched: run.rows_fetched,
            rows_new: run.rows_new,
            rows_updated: run.rows_updated,
            duration_sec: run.duration_sec,
        }
    }
}

/// Full state of one job as seen by a poller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub job_id: i64,
    pub status: JobStatus,
    pub total_tasks: i32,
    pub completed_tasks: i32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub current_task: Option<CurrentTask>,
    pub completed_list: Vec<CompletedTask>,
    /// Completion fraction in `[0, 1]`.
    pub progress: f64,
}

/// Result of a progress poll.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressView {
    /// No job requested and none active.
    Idle,
    Job(Box<JobProgress>),
}

impl Serialize for ProgressView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ProgressView::Idle => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("status", "idle")?;
                map.end()
            }
            ProgressView::Job(progress) => progress.serialize(serializer),
        }
    }
}

/// Completion fraction of a job.
///
/// `(completed_tasks + done_chunks / total_chunks) / total_tasks`, clamped to
/// `[0, 1]`. A job without tasks is complete once it succeeded.
pub fn progress_fraction(job: &Job, current: Option<&CurrentTask>) -> f64 {
    if job.total_tasks <= 0 {
        return if job.status == JobStatus::Success {
            1.0
        } else {
            0.0
        };
    }

    let partial = match current {
        Some(task) if task.total_chunks > 0 => {
            f64::from(task.done_chunks.clamp(0, task.total_chunks)) / f64::from(task.total_chunks)
        }
        _ => 0.0,
    };

    ((f64::from(job.completed_tasks) + partial) / f64::from(job.total_tasks)).clamp(0.0, 1.0)
}

/// Times the job counters are re-read while a worker is moving between tasks.
const SNAPSHOT_ATTEMPTS: usize = 3;

/// Builds progress views, running the liveness checks first.
pub struct ProgressService<G: ProgressStore, L: LivenessProbe> {
    progress: G,
    monitor: LivenessMonitor<G, L>,
}

impl<G: ProgressStore, L: LivenessProbe> ProgressService<G, L> {
    pub fn new(progress: G, probe: L, timeout_minutes: u32) -> Self {
        Self {
            monitor: LivenessMonitor::new(progress.clone(), probe, timeout_minutes),
            progress,
        }
    }

    /// Progress of `job_id`, or of the active job when `None`.
    pub async fn progress(
        &self,
        job_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<ProgressView, AppError> {
        let job = match job_id {
            Some(id) => self
                .progress
                .find_job(id)
                .await?
                .ok_or(AppError::JobNotFound(id))?,
            None => match self.progress.find_active_job().await? {
                Some(job) => job,
                None => return Ok(ProgressView::Idle),
            },
        };

        let job = self.monitor.check(job, now).await?;
        let (job, current_task) = self.snapshot(job).await?;

        let completed_list = self
            .progress
            .completed_tasks(job.id)
            .await?
            .into_iter()
            .map(CompletedTask::from)
            .collect();
        let progress = progress_fraction(&job, current_task.as_ref());

        Ok(ProgressView::Job(Box::new(JobProgress {
            job_id: job.id,
            status: job.status,
            total_tasks: job.total_tasks,
            completed_tasks: job.completed_tasks,
            error_message: job.error_message,
            started_at: job.started_at,
            finished_at: job.finished_at,
            current_task,
            completed_list,
            progress,
        })))
    }

    /// Reads the running task and re-reads the job until both belong to the
    /// same state.
    ///
    /// `completed_tasks` only grows and moves together with the task run that
    /// finished, so an unchanged count around the task read means the pair
    /// is consistent.
    async fn snapshot(&self, mut job: Job) -> Result<(Job, Option<CurrentTask>), AppError> {
        for _ in 0..SNAPSHOT_ATTEMPTS {
            let current = self
                .progress
                .find_running_task(job.id)
                .await?
                .as_ref()
                .map(CurrentTask::from);
            if job.status.is_terminal() {
                return Ok((job, current));
            }

            let reread = self
                .progress
                .find_job(job.id)
                .await?
                .ok_or(AppError::JobNotFound(job.id))?;
            if reread.completed_tasks == job.completed_tasks && reread.status == job.status {
                return Ok((reread, current));
            }
            job = reread;
        }

        let current = self
            .progress
            .find_running_task(job.id)
            .await?
            .as_ref()
            .map(CurrentTask::from);
        Ok((job, current))
    }
}

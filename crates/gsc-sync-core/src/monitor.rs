//! On-demand crash and timeout detection for active jobs.
//!
//! Nothing runs in the background: progress readers call
//! [`LivenessMonitor::check`] before building their view. Both checks are
//! no-ops for terminal jobs, so repeated polls are idempotent.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{AppError, MAX_PERSISTED_ERROR_CHARS, truncate_message};
use crate::job::Job;
use crate::traits::{JobHandle, Liveness, LivenessProbe, ProgressStore};

/// Lines of captured output appended to a crash message.
pub const CRASH_LOG_TAIL_LINES: usize = 10;

/// Detects crashed and stalled workers and forces their job to error.
pub struct LivenessMonitor<G: ProgressStore, L: LivenessProbe> {
    progress: G,
    probe: L,
    timeout_minutes: u32,
}

impl<G: ProgressStore, L: LivenessProbe> LivenessMonitor<G, L> {
    pub fn new(progress: G, probe: L, timeout_minutes: u32) -> Self {
        Self {
            progress,
            probe,
            timeout_minutes,
        }
    }

    /// Runs the crash check, then the timeout check, and returns the job as
    /// stored afterwards.
    pub async fn check(&self, job: Job, now: DateTime<Utc>) -> Result<Job, AppError> {
        if job.status.is_terminal() {
            return Ok(job);
        }

        let changed = self.check_crash(&job, now).await? || self.check_timeout(&job, now).await?;
        if !changed {
            return Ok(job);
        }

        self.progress
            .find_job(job.id)
            .await?
            .ok_or(AppError::JobNotFound(job.id))
    }

    /// Fails the job when its recorded worker no longer exists.
    ///
    /// An inconclusive probe counts as alive.
    async fn check_crash(&self, job: &Job, now: DateTime<Utc>) -> Result<bool, AppError> {
        let handle = JobHandle::from_job(job);
        let Some(pid) = handle.pid else {
            return Ok(false);
        };

        match handle.liveness(&self.probe) {
            Liveness::Alive => return Ok(false),
            Liveness::Unknown => {
                debug!(job_id = job.id, pid, "Liveness inconclusive, assuming alive");
                return Ok(false);
            }
            Liveness::Dead => {}
        }

        let tail = match &handle.log_file {
            Some(path) => read_log_tail(path, CRASH_LOG_TAIL_LINES).await,
            None => Vec::new(),
        };
        let message = truncate_message(&crash_message(pid, &tail), MAX_PERSISTED_ERROR_CHARS);

        warn!(job_id = job.id, pid, "Worker process vanished, failing job");
        self.progress.fail_job(job.id, &message).await?;
        self.fail_running_task(job.id, &message, now).await?;
        Ok(true)
    }

    /// Signals and fails a job that has run past the configured ceiling.
    async fn check_timeout(&self, job: &Job, now: DateTime<Utc>) -> Result<bool, AppError> {
        let elapsed = job.elapsed_minutes(now);
        if elapsed <= f64::from(self.timeout_minutes) {
            return Ok(false);
        }

        let signalled = JobHandle::from_job(job).terminate(&self.probe);
        warn!(
            job_id = job.id,
            elapsed_minutes = elapsed,
            signalled,
            "Job exceeded its time limit"
        );

        let message = timeout_message(self.timeout_minutes, elapsed);
        self.progress.fail_job(job.id, &message).await?;
        if let Some(task) = self.progress.find_running_task(job.id).await? {
            self.progress
                .fail_task(task.id, &message, elapsed * 60.0)
                .await?;
        }
        Ok(true)
    }

    async fn fail_running_task(
        &self,
        job_id: i64,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if let Some(task) = self.progress.find_running_task(job_id).await? {
            let duration = (now - task.started_at).num_milliseconds().max(0) as f64 / 1000.0;
            self.progress.fail_task(task.id, message, duration).await?;
        }
        Ok(())
    }
}

/// Error recorded for a job whose worker disappeared.
pub fn crash_message(pid: i32, tail: &[String]) -> String {
    let mut message = format!("process crashed (PID {pid} not found)");
    if !tail.is_empty() {
        message.push_str("\n--- last log lines ---\n");
        message.push_str(&tail.join("\n"));
    }
    message
}

/// Error recorded for a job that ran past its ceiling.
pub fn timeout_message(timeout_minutes: u32, elapsed_minutes: f64) -> String {
    format!("timeout: process exceeded {timeout_minutes} minutes ({elapsed_minutes:.1} min elapsed)")
}

/// Last `lines` lines of a captured-output file; empty when unreadable.
pub async fn read_log_tail(path: &Path, lines: usize) -> Vec<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            let all: Vec<&str> = text.lines().collect();
            let skip = all.len().saturating_sub(lines);
            all[skip..].iter().map(|line| line.to_string()).collect()
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cannot read worker log");
            Vec::new()
        }
    }
}

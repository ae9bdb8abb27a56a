//! Job creation and detached worker launch.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::error::{AppError, MAX_PERSISTED_ERROR_CHARS, truncate_message};
use crate::traits::{JobLauncher, LaunchRequest, ProgressStore};

/// What a trigger did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Another job is pending or running; nothing was created.
    AlreadyRunning { job_id: i64 },
    /// A new job was created and its worker launched.
    Started { job_id: i64, log_file: PathBuf },
}

impl TriggerOutcome {
    pub fn job_id(&self) -> i64 {
        match self {
            TriggerOutcome::AlreadyRunning { job_id } | TriggerOutcome::Started { job_id, .. } => {
                *job_id
            }
        }
    }
}

/// Creates jobs and hands them to a detached worker.
pub struct TriggerService<G: ProgressStore, L: JobLauncher> {
    progress: G,
    launcher: L,
    config: SyncConfig,
}

impl<G: ProgressStore, L: JobLauncher> TriggerService<G, L> {
    pub fn new(progress: G, launcher: L, config: SyncConfig) -> Self {
        Self {
            progress,
            launcher,
            config,
        }
    }

    /// Starts a job for `site_id` (or every active site) unless one is active.
    pub async fn trigger(&self, site_id: Option<i64>) -> Result<TriggerOutcome, AppError> {
        if let Some(active) = self.progress.find_active_job().await? {
            return Ok(TriggerOutcome::AlreadyRunning { job_id: active.id });
        }

        let job = match self.progress.create_job(site_id).await {
            Ok(job) => job,
            Err(AppError::ActiveJobExists) => {
                // Lost a race against a concurrent trigger.
                return match self.progress.find_active_job().await? {
                    Some(winner) => Ok(TriggerOutcome::AlreadyRunning { job_id: winner.id }),
                    None => Err(AppError::ActiveJobExists),
                };
            }
            Err(e) => return Err(e),
        };

        let log_file = self.config.job_log_path(job.id);
        self.progress.set_job_log_file(job.id, &log_file).await?;

        let request = LaunchRequest {
            job_id: job.id,
            site_id,
            log_file: log_file.clone(),
        };
        match self.launcher.launch(&request) {
            Ok(handle) => {
                // Recorded now so a worker that dies before attaching is still
                // caught by the crash check.
                if let Some(pid) = handle.pid {
                    self.progress.set_job_pid(job.id, pid).await?;
                }
                info!(job_id = job.id, pid = ?handle.pid, log_file = %log_file.display(), "Worker launched");
                Ok(TriggerOutcome::Started {
                    job_id: job.id,
                    log_file,
                })
            }
            Err(e) => {
                error!(job_id = job.id, error = %e, "Failed to launch worker");
                self.progress
                    .fail_job(
                        job.id,
                        &truncate_message(&format!("launch failed: {e}"), MAX_PERSISTED_ERROR_CHARS),
                    )
                    .await?;
                Err(e)
            }
        }
    }
}

//! Sync lifecycle events and their reporters.
//!
//! The coordinator emits [`SyncEvent`]s instead of logging directly, so the
//! worker binary, tests and any future frontend choose how to present them.

use tracing::{error, info, warn};

use crate::chunk::DateRange;
use crate::config::SearchType;
use crate::coordinator::{SyncReport, TaskSummary};
use crate::job::TaskOutcome;
use crate::models::UpsertCounts;

/// Events emitted while a job runs.
#[derive(Debug, Clone)]
pub enum SyncEvent<'a> {
    /// Sites were imported from the provider.
    SitesImported { count: usize },
    /// The task list is known.
    JobStarted {
        job_id: Option<i64>,
        total_tasks: usize,
    },
    /// A task run was created for an owed range.
    TaskStarted {
        task_run_id: i64,
        site_url: &'a str,
        search_type: SearchType,
        range: DateRange,
        total_chunks: usize,
    },
    /// One chunk was fetched and, if it held rows, persisted.
    ChunkCompleted {
        task_run_id: i64,
        chunk: DateRange,
        rows: usize,
        counts: UpsertCounts,
    },
    /// A task reached its terminal outcome.
    TaskFinished { summary: &'a TaskSummary },
    /// The task loop ended.
    JobFinished {
        job_id: Option<i64>,
        report: &'a SyncReport,
    },
}

/// Receives sync events.
pub trait SyncReporter: Send + Sync {
    /// The default implementation does nothing.
    fn report(&self, event: SyncEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSyncReporter;

impl SyncReporter for SilentSyncReporter {}

/// Reporter that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSyncReporter;

impl SyncReporter for TracingSyncReporter {
    fn report(&self, event: SyncEvent<'_>) {
        match event {
            SyncEvent::SitesImported { count } => {
                info!(count, "Imported sites from Search Console");
            }
            SyncEvent::JobStarted {
                job_id,
                total_tasks,
            } => {
                info!(?job_id, total_tasks, "Sync started");
            }
            SyncEvent::TaskStarted {
                task_run_id,
                site_url,
                search_type,
                range,
                total_chunks,
            } => {
                info!(
                    task_run_id,
                    site = site_url,
                    %search_type,
                    from = %range.start,
                    to = %range.end,
                    total_chunks,
                    "Syncing range"
                );
            }
            SyncEvent::ChunkCompleted {
                task_run_id,
                chunk,
                rows,
                counts,
            } => {
                info!(
                    task_run_id,
                    chunk_start = %chunk.start,
                    chunk_end = %chunk.end,
                    rows,
                    new = counts.new,
                    updated = counts.updated,
                    "Chunk done"
                );
            }
            SyncEvent::TaskFinished { summary } => match summary.outcome {
                TaskOutcome::Error => error!(
                    site = %summary.site_url,
                    search_type = %summary.search_type,
                    duration_sec = summary.duration_sec,
                    error = summary.error.as_deref().unwrap_or("unknown error"),
                    "Task failed"
                ),
                TaskOutcome::Empty => warn!(
                    site = %summary.site_url,
                    search_type = %summary.search_type,
                    duration_sec = summary.duration_sec,
                    "No data returned for the whole range"
                ),
                TaskOutcome::UpToDate => info!(
                    site = %summary.site_url,
                    search_type = %summary.search_type,
                    "Already up to date"
                ),
                TaskOutcome::Success => info!(
                    site = %summary.site_url,
                    search_type = %summary.search_type,
                    rows_fetched = summary.rows_fetched,
                    rows_new = summary.rows_new,
                    rows_updated = summary.rows_updated,
                    duration_sec = summary.duration_sec,
                    "Task finished"
                ),
            },
            SyncEvent::JobFinished { job_id, report } => {
                if report.has_errors() {
                    error!(?job_id, tasks = report.tasks.len(), "Sync aborted by a task error");
                } else {
                    info!(
                        ?job_id,
                        tasks = report.tasks.len(),
                        rows_fetched = report.rows_fetched(),
                        "Sync finished"
                    );
                }
            }
        }
    }
}

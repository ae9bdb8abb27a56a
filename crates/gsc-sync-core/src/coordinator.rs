//! Job coordinator: drives every (site, result type) task of a job.
//!
//! # Run algorithm
//!
//! 1. Optionally import the site list from the provider.
//! 2. Build the task list: target sites × configured result types.
//! 3. Move the job to running with its task count (zero tasks succeeds at once).
//! 4. For each task, strictly in sequence: resolve the owed range, create a
//!    task run, then fetch, upsert and advance chunk by chunk.
//! 5. Classify the task as success, empty, error or up to date. A finished
//!    task counts towards the job in the same store write that ends its run,
//!    which keeps the polled progress fraction non-decreasing.
//!
//! A task error stops the loop: the task run and the job are both marked
//! error. Errors outside the task loop mark the job error and propagate.
//!
//! Job bookkeeping only happens when the run is attached to a job id.

use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::chunk::DateRange;
use crate::config::{SearchType, SyncConfig};
use crate::error::AppError;
use crate::fetch::PagedFetcher;
use crate::job::{NewTaskRun, TaskCompletion, TaskOutcome};
use crate::models::{Site, UpsertCounts};
use crate::range::{ResolvedRange, resolve_range};
use crate::reporter::{SyncEvent, SyncReporter};
use crate::traits::{AnalyticsProvider, PerformanceStore, ProgressStore, SiteStore};

// =============================================================================
// Run Request / Report
// =============================================================================

/// Parameters of one worker invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Job to attach progress to; `None` runs untracked.
    pub job_id: Option<i64>,
    /// Restrict the run to one site; `None` means every active site.
    pub site_id: Option<i64>,
    /// Refresh the site list from the provider before running.
    pub import_sites: bool,
    /// Reference day for range resolution.
    pub today: NaiveDate,
}

/// Terminal outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub site_url: String,
    pub search_type: SearchType,
    pub outcome: TaskOutcome,
    pub rows_fetched: i64,
    pub rows_new: i64,
    pub rows_updated: i64,
    pub duration_sec: f64,
    pub error: Option<String>,
}

impl TaskSummary {
    fn new(site_url: &str, search_type: SearchType, outcome: TaskOutcome) -> Self {
        Self {
            site_url: site_url.to_string(),
            search_type,
            outcome,
            rows_fetched: 0,
            rows_new: 0,
            rows_updated: 0,
            duration_sec: 0.0,
            error: None,
        }
    }

    pub fn up_to_date(site_url: &str, search_type: SearchType) -> Self {
        Self::new(site_url, search_type, TaskOutcome::UpToDate)
    }

    pub fn empty(site_url: &str, search_type: SearchType, duration_sec: f64) -> Self {
        Self {
            duration_sec,
            ..Self::new(site_url, search_type, TaskOutcome::Empty)
        }
    }

    pub fn error(
        site_url: &str,
        search_type: SearchType,
        message: impl Into<String>,
        duration_sec: f64,
    ) -> Self {
        Self {
            duration_sec,
            error: Some(message.into()),
            ..Self::new(site_url, search_type, TaskOutcome::Error)
        }
    }
}

/// Per-task outcomes of one run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub tasks: Vec<TaskSummary>,
}

impl SyncReport {
    pub fn has_errors(&self) -> bool {
        self.tasks.iter().any(|t| t.outcome == TaskOutcome::Error)
    }

    pub fn rows_fetched(&self) -> i64 {
        self.tasks.iter().map(|t| t.rows_fetched).sum()
    }

    fn first_error(&self) -> Option<&str> {
        self.tasks
            .iter()
            .find(|t| t.outcome == TaskOutcome::Error)
            .and_then(|t| t.error.as_deref())
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Orchestrates range resolution, chunked fetching, upserts and progress.
pub struct JobCoordinator<A, S, P, G>
where
    A: AnalyticsProvider,
    S: SiteStore,
    P: PerformanceStore,
    G: ProgressStore,
{
    fetcher: PagedFetcher<A>,
    sites: S,
    performance: P,
    progress: G,
    config: SyncConfig,
}

impl<A, S, P, G> JobCoordinator<A, S, P, G>
where
    A: AnalyticsProvider,
    S: SiteStore,
    P: PerformanceStore,
    G: ProgressStore,
{
    pub fn new(provider: A, sites: S, performance: P, progress: G, config: SyncConfig) -> Self {
        Self {
            fetcher: PagedFetcher::new(provider, &config),
            sites,
            performance,
            progress,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs every task of the request.
    ///
    /// Returns `Ok` with the per-task report when the loop ran, even if a task
    /// failed; returns `Err` only for failures outside the task loop, after
    /// marking the attached job as error.
    pub async fn run<R: SyncReporter>(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<SyncReport, AppError> {
        match self.run_tasks(request, cancel, reporter).await {
            Ok(report) => Ok(report),
            Err(e) => {
                if let Some(job_id) = request.job_id {
                    self.record_job_failure(job_id, &e.persisted_message()).await;
                }
                Err(e)
            }
        }
    }

    /// Upserts every provider-listed site by URL. Returns how many were listed.
    pub async fn import_sites(&self) -> Result<usize, AppError> {
        let listed = self.fetcher.provider().list_sites().await?;
        for site in &listed {
            self.sites.upsert_site(&site.site_url, None).await?;
        }
        Ok(listed.len())
    }

    async fn run_tasks<R: SyncReporter>(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<SyncReport, AppError> {
        if request.import_sites {
            let count = self.import_sites().await?;
            reporter.report(SyncEvent::SitesImported { count });
        }

        let sites = self.target_sites(request.site_id).await?;
        let total_tasks = sites.len() * self.config.search_types.len();

        if let Some(job_id) = request.job_id {
            self.progress
                .start_job(job_id, saturating_i32(total_tasks))
                .await?;
        }
        reporter.report(SyncEvent::JobStarted {
            job_id: request.job_id,
            total_tasks,
        });

        let mut report = SyncReport::default();

        'sites: for site in &sites {
            for &search_type in &self.config.search_types {
                let summary = self
                    .run_task(request, site, search_type, cancel, reporter)
                    .await;

                // Success and empty runs already advanced the job with their
                // terminal write; an up-to-date task has no run to do it.
                if summary.outcome == TaskOutcome::UpToDate {
                    if let Some(job_id) = request.job_id {
                        self.progress.advance_job(job_id).await?;
                    }
                }
                reporter.report(SyncEvent::TaskFinished { summary: &summary });

                let failed = summary.outcome == TaskOutcome::Error;
                report.tasks.push(summary);
                if failed {
                    break 'sites;
                }
            }
        }

        if let Some(job_id) = request.job_id {
            match report.first_error() {
                Some(message) => self.record_job_failure(job_id, message).await,
                None => self.progress.succeed_job(job_id).await?,
            }
        }

        reporter.report(SyncEvent::JobFinished {
            job_id: request.job_id,
            report: &report,
        });

        Ok(report)
    }

    async fn target_sites(&self, site_id: Option<i64>) -> Result<Vec<Site>, AppError> {
        match site_id {
            Some(id) => Ok(self.sites.find_site(id).await?.into_iter().collect()),
            None => self.sites.active_sites().await,
        }
    }

    /// Runs one task and folds any failure into an error summary.
    async fn run_task<R: SyncReporter>(
        &self,
        request: &RunRequest,
        site: &Site,
        search_type: SearchType,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> TaskSummary {
        let started = Instant::now();

        let (task_run_id, range) = match self
            .open_task(request, site, search_type)
            .await
        {
            Ok(Some(opened)) => opened,
            Ok(None) => return TaskSummary::up_to_date(&site.site_url, search_type),
            Err(e) => {
                return TaskSummary::error(
                    &site.site_url,
                    search_type,
                    e.persisted_message(),
                    elapsed_secs(started),
                );
            }
        };

        match self
            .ingest(task_run_id, site, search_type, range, started, cancel, reporter)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                let duration = elapsed_secs(started);
                let message = e.persisted_message();
                if let Err(store_err) = self
                    .progress
                    .fail_task(task_run_id, &message, duration)
                    .await
                {
                    error!(task_run_id, error = %store_err, "Failed to record task failure");
                }
                TaskSummary::error(&site.site_url, search_type, message, duration)
            }
        }
    }

    /// Resolves the owed range and creates the running task run.
    ///
    /// Returns `None` when the task is up to date.
    async fn open_task(
        &self,
        request: &RunRequest,
        site: &Site,
        search_type: SearchType,
    ) -> Result<Option<(i64, DateRange)>, AppError> {
        let last = self.progress.last_success(site.id, search_type).await?;
        let resolved = resolve_range(request.today, &self.config, last.map(|run| run.date_to));

        let range = match resolved {
            ResolvedRange::UpToDate => return Ok(None),
            ResolvedRange::Owed(range) => range,
        };

        let task_run_id = self
            .progress
            .start_task(&NewTaskRun {
                job_id: request.job_id,
                site_id: site.id,
                search_type,
                date_from: range.start,
                date_to: range.end,
            })
            .await?;

        Ok(Some((task_run_id, range)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn ingest<R: SyncReporter>(
        &self,
        task_run_id: i64,
        site: &Site,
        search_type: SearchType,
        range: DateRange,
        started: Instant,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<TaskSummary, AppError> {
        let chunks = range.chunks(self.config.chunk_size_days)?;
        self.progress
            .set_task_chunks(task_run_id, saturating_i32(chunks.len()))
            .await?;

        reporter.report(SyncEvent::TaskStarted {
            task_run_id,
            site_url: &site.site_url,
            search_type,
            range,
            total_chunks: chunks.len(),
        });

        let mut rows_fetched: i64 = 0;
        let mut totals = UpsertCounts::default();
        let mut last_chunk_with_data: Option<NaiveDate> = None;

        for chunk in chunks {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let rows = self
                .fetcher
                .fetch_chunk(&site.site_url, search_type, chunk)
                .await?;

            let mut counts = UpsertCounts::default();
            if !rows.is_empty() {
                counts = self
                    .performance
                    .upsert_batch(site.id, search_type, &rows)
                    .await?;
                totals += counts;
                last_chunk_with_data = Some(chunk.end);
            }
            rows_fetched += rows.len() as i64;

            self.progress.advance_task_chunk(task_run_id).await?;
            reporter.report(SyncEvent::ChunkCompleted {
                task_run_id,
                chunk,
                rows: rows.len(),
                counts,
            });
        }

        let duration_sec = elapsed_secs(started);

        // Empty runs keep date_to nominal and never count as a success.
        if rows_fetched == 0 {
            self.progress
                .mark_task_empty(task_run_id, duration_sec)
                .await?;
            return Ok(TaskSummary::empty(&site.site_url, search_type, duration_sec));
        }

        let completion = TaskCompletion {
            rows_fetched,
            rows_new: totals.new as i64,
            rows_updated: totals.updated as i64,
            duration_sec,
            effective_date_to: last_chunk_with_data.filter(|end| *end < range.end),
        };
        self.progress.succeed_task(task_run_id, &completion).await?;

        Ok(TaskSummary {
            site_url: site.site_url.clone(),
            search_type,
            outcome: TaskOutcome::Success,
            rows_fetched,
            rows_new: completion.rows_new,
            rows_updated: completion.rows_updated,
            duration_sec,
            error: None,
        })
    }

    async fn record_job_failure(&self, job_id: i64, message: &str) {
        if let Err(e) = self.progress.fail_job(job_id, message).await {
            error!(job_id, error = %e, "Failed to record job failure");
        }
    }
}

fn elapsed_secs(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 100.0).round() / 100.0
}

fn saturating_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

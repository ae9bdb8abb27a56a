//! Coverage diagnostic for one (site, result type).

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::config::SearchType;
use crate::error::AppError;
use crate::job::{TaskRun, TaskStatus};
use crate::traits::{PerformanceStore, ProgressStore};

/// Maximum number of missing dates listed in a diagnostic.
pub const MISSING_DATES_LIMIT: usize = 30;

/// The latest successful run of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastSync {
    pub task_run_id: i64,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub status: TaskStatus,
    pub rows_fetched: i64,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<TaskRun> for LastSync {
    fn from(run: TaskRun) -> Self {
        Self {
            task_run_id: run.id,
            date_from: run.date_from,
            date_to: run.date_to,
            status: run.status,
            rows_fetched: run.rows_fetched,
            finished_at: run.finished_at,
        }
    }
}

/// What is stored for a task and where the gaps are.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncDiagnostic {
    pub site_id: i64,
    pub search_type: SearchType,
    pub total_rows: i64,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub days_with_data: usize,
    /// Count of every missing day, not only the listed ones.
    pub missing_days: usize,
    /// The first missing days, ascending.
    pub missing_dates: Vec<NaiveDate>,
    pub last_sync: Option<LastSync>,
}

/// Calendar days in `[min, max]` absent from `present`, ascending.
///
/// `present` must be sorted ascending.
pub fn missing_dates(present: &[NaiveDate], min: NaiveDate, max: NaiveDate) -> Vec<NaiveDate> {
    let mut missing = Vec::new();
    let mut known = present.iter().peekable();

    for day in min.iter_days().take_while(|day| *day <= max) {
        while known.next_if(|d| **d < day).is_some() {}
        if known.next_if_eq(&&day).is_none() {
            missing.push(day);
        }
    }
    missing
}

/// Reads stored coverage and the last successful run.
pub struct DiagnosticService<P: PerformanceStore, G: ProgressStore> {
    performance: P,
    progress: G,
}

impl<P: PerformanceStore, G: ProgressStore> DiagnosticService<P, G> {
    pub fn new(performance: P, progress: G) -> Self {
        Self {
            performance,
            progress,
        }
    }

    pub async fn diagnose(
        &self,
        site_id: i64,
        search_type: SearchType,
    ) -> Result<SyncDiagnostic, AppError> {
        let summary = self.performance.summarize(site_id, search_type).await?;

        let missing = match (summary.min_date, summary.max_date) {
            (Some(min), Some(max)) => missing_dates(&summary.dates, min, max),
            _ => Vec::new(),
        };

        let last_sync = self
            .progress
            .last_success(site_id, search_type)
            .await?
            .map(LastSync::from);

        Ok(SyncDiagnostic {
            site_id,
            search_type,
            total_rows: summary.total_rows,
            min_date: summary.min_date,
            max_date: summary.max_date,
            days_with_data: summary.dates.len(),
            missing_days: missing.len(),
            missing_dates: missing.into_iter().take(MISSING_DATES_LIMIT).collect(),
            last_sync,
        })
    }
}

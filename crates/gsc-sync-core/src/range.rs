//! Resolution of the date range a task still owes.
//!
//! The provider publishes data with a delay, so the newest owed day is
//! `today - api_latency_days`. The oldest is `today - lookback_days`, raised to
//! the day after the previous successful run's effective end. Empty runs never
//! count as a previous success, which keeps their range owed.

use chrono::{Days, NaiveDate};

use crate::chunk::DateRange;
use crate::config::SyncConfig;

/// The range a task must fetch, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedRange {
    /// Days still owed, both ends included.
    Owed(DateRange),
    /// The resumption floor is past the newest available day.
    UpToDate,
}

/// Computes the owed range for one task.
///
/// `last_success_to` is the effective `date_to` of the most recent successful
/// task run for the same (site, result type), if any.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use gsc_sync_core::config::SyncConfig;
/// use gsc_sync_core::range::{ResolvedRange, resolve_range};
///
/// let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
/// let ResolvedRange::Owed(range) = resolve_range(today, &SyncConfig::default(), None) else {
///     panic!("expected an owed range");
/// };
/// assert_eq!(range.start, NaiveDate::from_ymd_opt(2023, 2, 16).unwrap());
/// assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 6, 7).unwrap());
/// ```
pub fn resolve_range(
    today: NaiveDate,
    config: &SyncConfig,
    last_success_to: Option<NaiveDate>,
) -> ResolvedRange {
    let nominal_end = days_before(today, config.api_latency_days);
    let nominal_start = days_before(today, config.lookback_days);

    let start = match last_success_to.and_then(|d| d.succ_opt()) {
        Some(resume) => resume.max(nominal_start),
        None => nominal_start,
    };

    if start > nominal_end {
        ResolvedRange::UpToDate
    } else {
        ResolvedRange::Owed(DateRange {
            start,
            end: nominal_end,
        })
    }
}

fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

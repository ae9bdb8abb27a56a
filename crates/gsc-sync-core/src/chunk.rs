//! Inclusive date ranges and their division into bounded chunks.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a range, failing when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AppError> {
        if start > end {
            return Err(AppError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Number of days covered, both ends included.
    pub fn days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    /// Splits the range into chunks of at most `max_days` days.
    pub fn chunks(&self, max_days: u32) -> Result<Vec<DateRange>, AppError> {
        split_date_range(self.start, self.end, max_days)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.start, self.end)
    }
}

/// Splits `[start, end]` into ordered, contiguous, non-overlapping chunks.
///
/// Every chunk spans at most `max_days` days; only the last one may be
/// shorter.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use gsc_sync_core::chunk::split_date_range;
///
/// let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
/// let end = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
/// let chunks = split_date_range(start, end, 4).unwrap();
///
/// assert_eq!(chunks.len(), 3);
/// assert_eq!(chunks[2].start, NaiveDate::from_ymd_opt(2024, 1, 9).unwrap());
/// assert_eq!(chunks[2].end, end);
/// ```
pub fn split_date_range(
    start: NaiveDate,
    end: NaiveDate,
    max_days: u32,
) -> Result<Vec<DateRange>, AppError> {
    if start > end {
        return Err(AppError::InvalidDateRange { start, end });
    }
    if max_days == 0 {
        return Err(AppError::ConfigError(
            "chunk size must be at least 1 day".to_string(),
        ));
    }

    let span = Days::new(u64::from(max_days) - 1);
    let mut chunks = Vec::new();
    let mut current = start;

    loop {
        let chunk_end = current
            .checked_add_days(span)
            .map_or(end, |candidate| candidate.min(end));
        chunks.push(DateRange {
            start: current,
            end: chunk_end,
        });

        match chunk_end.succ_opt() {
            Some(next) if chunk_end < end => current = next,
            _ => break,
        }
    }

    Ok(chunks)
}

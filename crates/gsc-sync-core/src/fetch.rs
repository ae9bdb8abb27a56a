//! Paginated chunk fetching with bounded exponential backoff.
//!
//! A chunk is requested page by page starting at row 0. A page holding exactly
//! `page_size` rows means more may follow; a shorter page ends the chunk.
//! Every page request runs inside [`retry_with_backoff`].

use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::chunk::DateRange;
use crate::config::{DataState, SearchType, SyncConfig};
use crate::error::AppError;
use crate::models::PerformanceRow;
use crate::traits::AnalyticsProvider;

/// Dimensions requested for every row, in key order.
pub const DIMENSIONS: &[&str] = &["date", "page", "query", "country", "device"];

/// One page request against the analytics provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsQuery {
    pub site_url: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub dimensions: &'static [&'static str],
    pub row_limit: u32,
    pub start_row: u32,
    pub search_type: SearchType,
    pub data_state: DataState,
}

// =============================================================================
// Retry
// =============================================================================

/// Bounded retry policy for a single page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls allowed, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: config.retry_base_delay,
        }
    }

    /// Sleep before the next call after failed attempt number `attempt`.
    ///
    /// `base_delay × 2^(attempt − 1)`: 5s, 10s, 20s... with the default base.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor)
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the policy is
/// exhausted. The last error is returned on exhaustion.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient API error, retrying"
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// =============================================================================
// Paged Fetcher
// =============================================================================

/// Fetches whole chunks from an [`AnalyticsProvider`].
#[derive(Clone)]
pub struct PagedFetcher<P: AnalyticsProvider> {
    provider: P,
    page_size: u32,
    data_state: DataState,
    retry: RetryPolicy,
}

impl<P: AnalyticsProvider> PagedFetcher<P> {
    pub fn new(provider: P, config: &SyncConfig) -> Self {
        Self {
            provider,
            page_size: config.page_size.max(1),
            data_state: config.data_state,
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Fetches every row of one chunk.
    ///
    /// Any exhausted or permanent failure aborts the whole chunk.
    pub async fn fetch_chunk(
        &self,
        site_url: &str,
        search_type: SearchType,
        range: DateRange,
    ) -> Result<Vec<PerformanceRow>, AppError> {
        let mut rows = Vec::new();
        let mut start_row = 0u32;

        loop {
            let query = AnalyticsQuery {
                site_url: site_url.to_string(),
                start_date: range.start,
                end_date: range.end,
                dimensions: DIMENSIONS,
                row_limit: self.page_size,
                start_row,
                search_type,
                data_state: self.data_state,
            };

            let provider = &self.provider;
            let query_ref = &query;
            let page = retry_with_backoff(&self.retry, move || provider.query(query_ref)).await?;

            let count = page.len();
            rows.extend(page);
            debug!(site = site_url, %search_type, start_row, count, "Fetched page");

            if count < self.page_size as usize {
                break;
            }
            start_row = start_row.saturating_add(count as u32);
        }

        Ok(rows)
    }
}

//! Domain models for sites and performance rows.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A Search Console property tracked locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    /// Canonical property URL, e.g. `https://example.com/` or `sc-domain:example.com`.
    pub site_url: String,
    pub label: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A property as listed by the analytics provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSite {
    pub site_url: String,
    pub permission_level: String,
}

/// One row of analytics metrics keyed by its queried dimensions.
///
/// Together with the site and result type, `(date, page, query, country,
/// device)` forms the natural key under which rows are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRow {
    pub date: NaiveDate,
    pub page: String,
    pub query: String,
    pub country: String,
    pub device: String,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

/// Exact outcome of an upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    /// Rows whose natural key did not exist before.
    pub new: u64,
    /// Rows that replaced the metrics of an existing key.
    pub updated: u64,
}

impl UpsertCounts {
    pub fn total(&self) -> u64 {
        self.new + self.updated
    }
}

impl std::ops::AddAssign for UpsertCounts {
    fn add_assign(&mut self, other: Self) {
        self.new += other.new;
        self.updated += other.updated;
    }
}

/// Aggregate facts about the rows stored for one (site, result type).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDataSummary {
    pub total_rows: i64,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    /// Distinct dates that have at least one row, ascending.
    pub dates: Vec<NaiveDate>,
}

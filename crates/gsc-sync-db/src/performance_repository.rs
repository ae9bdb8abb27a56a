//! Performance row storage with exact insert/update accounting.
//!
//! Each batch runs in one transaction. Every row is written with
//! `INSERT ... ON CONFLICT DO UPDATE` and reports `xmax = 0` through
//! `RETURNING`, which is true only for a freshly inserted tuple. That gives
//! per-row new/updated counts without a prior lookup.

use chrono::NaiveDate;
use sqlx::{PgPool, Pool, Postgres};
use tracing::debug;

use gsc_sync_core::config::SearchType;
use gsc_sync_core::error::AppError;
use gsc_sync_core::models::{PerformanceRow, StoredDataSummary, UpsertCounts};
use gsc_sync_core::traits::PerformanceStore;

#[derive(Clone)]
pub struct PerformanceRepository {
    pool: Pool<Postgres>,
}

impl PerformanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PerformanceStore for PerformanceRepository {
    async fn upsert_batch(
        &self,
        site_id: i64,
        search_type: SearchType,
        rows: &[PerformanceRow],
    ) -> Result<UpsertCounts, AppError> {
        let mut counts = UpsertCounts::default();
        if rows.is_empty() {
            return Ok(counts);
        }

        let mut tx = self.pool.begin().await?;

        for row in rows {
            let inserted: bool = sqlx::query_scalar(
                r#"
                INSERT INTO performance_rows (
                    site_id, data_date, page, query, country, device, search_type,
                    clicks, impressions, ctr, position
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (site_id, data_date, page, query, country, device, search_type)
                DO UPDATE SET
                    clicks = EXCLUDED.clicks,
                    impressions = EXCLUDED.impressions,
                    ctr = EXCLUDED.ctr,
                    position = EXCLUDED.position
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(site_id)
            .bind(row.date)
            .bind(&row.page)
            .bind(&row.query)
            .bind(&row.country)
            .bind(&row.device)
            .bind(search_type.as_str())
            .bind(row.clicks)
            .bind(row.impressions)
            .bind(row.ctr)
            .bind(row.position)
            .fetch_one(&mut *tx)
            .await?;

            if inserted {
                counts.new += 1;
            } else {
                counts.updated += 1;
            }
        }

        tx.commit().await?;

        debug!(
            site_id,
            search_type = %search_type,
            new = counts.new,
            updated = counts.updated,
            "Upserted performance batch"
        );
        Ok(counts)
    }

    async fn summarize(
        &self,
        site_id: i64,
        search_type: SearchType,
    ) -> Result<StoredDataSummary, AppError> {
        let (total_rows, min_date, max_date): (i64, Option<NaiveDate>, Option<NaiveDate>) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*), MIN(data_date), MAX(data_date)
                FROM performance_rows
                WHERE site_id = $1 AND search_type = $2
                "#,
            )
            .bind(site_id)
            .bind(search_type.as_str())
            .fetch_one(&self.pool)
            .await?;

        let dates: Vec<NaiveDate> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT data_date
            FROM performance_rows
            WHERE site_id = $1 AND search_type = $2
            ORDER BY data_date
            "#,
        )
        .bind(site_id)
        .bind(search_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(StoredDataSummary {
            total_rows,
            min_date,
            max_date,
            dates,
        })
    }
}

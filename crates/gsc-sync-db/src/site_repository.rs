//! Site repository for PostgreSQL.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use gsc_sync_core::error::AppError;
use gsc_sync_core::models::Site;
use gsc_sync_core::traits::SiteStore;

/// PostgreSQL storage of tracked Search Console properties.
#[derive(Clone)]
pub struct SiteRepository {
    pool: Pool<Postgres>,
}

impl SiteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SiteRow {
    id: i64,
    site_url: String,
    label: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<SiteRow> for Site {
    fn from(row: SiteRow) -> Self {
        Self {
            id: row.id,
            site_url: row.site_url,
            label: row.label,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

impl SiteStore for SiteRepository {
    async fn upsert_site(&self, site_url: &str, label: Option<&str>) -> Result<Site, AppError> {
        let row: SiteRow = sqlx::query_as(
            r#"
            INSERT INTO sites (site_url, label)
            VALUES ($1, COALESCE($2, $1))
            ON CONFLICT (site_url) DO UPDATE SET label = COALESCE($2, sites.label)
            RETURNING id, site_url, label, active, created_at
            "#,
        )
        .bind(site_url)
        .bind(label)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_site(&self, id: i64) -> Result<Option<Site>, AppError> {
        let row: Option<SiteRow> = sqlx::query_as(
            "SELECT id, site_url, label, active, created_at FROM sites WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn active_sites(&self) -> Result<Vec<Site>, AppError> {
        let rows: Vec<SiteRow> = sqlx::query_as(
            r#"
            SELECT id, site_url, label, active, created_at
            FROM sites
            WHERE active
            ORDER BY site_url
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

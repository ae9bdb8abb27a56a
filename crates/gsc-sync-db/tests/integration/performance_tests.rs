//! Integration tests for SiteRepository and PerformanceRepository.

use chrono::NaiveDate;
use sqlx::PgPool;

use gsc_sync_core::config::SearchType;
use gsc_sync_core::models::UpsertCounts;
use gsc_sync_core::traits::{PerformanceStore, SiteStore};
use gsc_sync_db::{PerformanceRepository, SiteRepository};

use crate::integration::common::{date, sample_row, setup_test_db};

#[tokio::test]
async fn test_upsert_site_defaults_label_and_keeps_it() {
    let (pool, _container) = setup_test_db().await;
    let sites = SiteRepository::new(pool);

    let created = sites.upsert_site("sc-domain:example.com", None).await.unwrap();
    assert_eq!(created.label, "sc-domain:example.com");
    assert!(created.active);

    // Re-importing without a label keeps the row and its label.
    let again = sites.upsert_site("sc-domain:example.com", None).await.unwrap();
    assert_eq!(again.id, created.id);
    assert_eq!(again.label, "sc-domain:example.com");

    let renamed = sites
        .upsert_site("sc-domain:example.com", Some("Example"))
        .await
        .unwrap();
    assert_eq!(renamed.id, created.id);
    assert_eq!(renamed.label, "Example");
}

#[tokio::test]
async fn test_active_sites_ordered_by_url() {
    let (pool, _container) = setup_test_db().await;
    let sites = SiteRepository::new(pool.clone());
    sites.upsert_site("https://b.example/", None).await.unwrap();
    sites.upsert_site("https://a.example/", None).await.unwrap();
    let hidden = sites.upsert_site("https://c.example/", None).await.unwrap();
    sqlx::query("UPDATE sites SET active = FALSE WHERE id = $1")
        .bind(hidden.id)
        .execute(&pool)
        .await
        .unwrap();

    let active = sites.active_sites().await.unwrap();

    let urls: Vec<_> = active.iter().map(|s| s.site_url.as_str()).collect();
    assert_eq!(urls, vec!["https://a.example/", "https://b.example/"]);
    assert!(sites.find_site(hidden.id).await.unwrap().is_some());
    assert!(sites.find_site(9999).await.unwrap().is_none());
}

/// New keys count as new, existing keys as updated, and metrics are replaced.
#[tokio::test]
async fn test_upsert_batch_counts_new_and_updated() {
    // Arrange
    let (pool, _container) = setup_test_db().await;
    let site = SiteRepository::new(pool.clone())
        .upsert_site("https://example.com/", None)
        .await
        .unwrap();
    let repo = PerformanceRepository::new(pool.clone());
    let day = date(2024, 1, 10);

    let first = repo
        .upsert_batch(site.id, SearchType::Web, &[sample_row(day, 1), sample_row(day, 2)])
        .await
        .unwrap();
    assert_eq!(first, UpsertCounts { new: 2, updated: 0 });

    // Act
    let mut changed = sample_row(day, 2);
    changed.clicks = 500;
    let second = repo
        .upsert_batch(site.id, SearchType::Web, &[changed, sample_row(day, 3)])
        .await
        .unwrap();

    // Assert
    assert_eq!(second, UpsertCounts { new: 1, updated: 1 });

    let clicks: i64 = sqlx::query_scalar(
        "SELECT clicks FROM performance_rows WHERE page = 'https://example.com/page-2'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(clicks, 500);
}

type StoredMetrics = (NaiveDate, String, i64, i64, f64, f64);

async fn stored_metrics(pool: &PgPool, site_id: i64) -> Vec<StoredMetrics> {
    sqlx::query_as(
        "SELECT data_date, page, clicks, impressions, ctr, position FROM performance_rows \
         WHERE site_id = $1 ORDER BY data_date, page",
    )
    .bind(site_id)
    .fetch_all(pool)
    .await
    .unwrap()
}

/// Re-applying a batch adds no rows, reports every row as updated and
/// leaves the stored metrics as they were.
#[tokio::test]
async fn test_upsert_batch_is_idempotent() {
    let (pool, _container) = setup_test_db().await;
    let site = SiteRepository::new(pool.clone())
        .upsert_site("https://example.com/", None)
        .await
        .unwrap();
    let repo = PerformanceRepository::new(pool.clone());
    let rows = vec![sample_row(date(2024, 1, 10), 1), sample_row(date(2024, 1, 11), 2)];

    repo.upsert_batch(site.id, SearchType::Web, &rows).await.unwrap();
    let before = stored_metrics(&pool, site.id).await;
    let again = repo.upsert_batch(site.id, SearchType::Web, &rows).await.unwrap();
    let after = stored_metrics(&pool, site.id).await;

    assert_eq!(again, UpsertCounts { new: 0, updated: 2 });
    let summary = repo.summarize(site.id, SearchType::Web).await.unwrap();
    assert_eq!(summary.total_rows, 2);

    assert_eq!(after, before);
    let expected: Vec<StoredMetrics> = rows
        .iter()
        .map(|r| (r.date, r.page.clone(), r.clicks, r.impressions, r.ctr, r.position))
        .collect();
    assert_eq!(after, expected);
}

/// The search type is part of the natural key.
#[tokio::test]
async fn test_same_key_under_other_search_type_is_new() {
    let (pool, _container) = setup_test_db().await;
    let site = SiteRepository::new(pool.clone())
        .upsert_site("https://example.com/", None)
        .await
        .unwrap();
    let repo = PerformanceRepository::new(pool);
    let rows = vec![sample_row(date(2024, 1, 10), 1)];

    repo.upsert_batch(site.id, SearchType::Web, &rows).await.unwrap();
    let image = repo.upsert_batch(site.id, SearchType::Image, &rows).await.unwrap();

    assert_eq!(image, UpsertCounts { new: 1, updated: 0 });
}

/// A failing row rolls back the rows written before it.
#[tokio::test]
async fn test_upsert_batch_rolls_back_on_failure() {
    let (pool, _container) = setup_test_db().await;
    let site = SiteRepository::new(pool.clone())
        .upsert_site("https://example.com/", None)
        .await
        .unwrap();
    let repo = PerformanceRepository::new(pool);

    let mut bad = sample_row(date(2024, 1, 10), 2);
    bad.country = "not-a-country-code".to_string();
    let result = repo
        .upsert_batch(site.id, SearchType::Web, &[sample_row(date(2024, 1, 10), 1), bad])
        .await;

    assert!(result.is_err());
    let summary = repo.summarize(site.id, SearchType::Web).await.unwrap();
    assert_eq!(summary.total_rows, 0);
}

#[tokio::test]
async fn test_summarize_reports_bounds_and_distinct_dates() {
    let (pool, _container) = setup_test_db().await;
    let site = SiteRepository::new(pool.clone())
        .upsert_site("https://example.com/", None)
        .await
        .unwrap();
    let repo = PerformanceRepository::new(pool);
    repo.upsert_batch(
        site.id,
        SearchType::Web,
        &[
            sample_row(date(2024, 1, 12), 1),
            sample_row(date(2024, 1, 10), 2),
            sample_row(date(2024, 1, 12), 3),
        ],
    )
    .await
    .unwrap();

    let summary = repo.summarize(site.id, SearchType::Web).await.unwrap();

    assert_eq!(summary.total_rows, 3);
    assert_eq!(summary.min_date, Some(date(2024, 1, 10)));
    assert_eq!(summary.max_date, Some(date(2024, 1, 12)));
    assert_eq!(summary.dates, vec![date(2024, 1, 10), date(2024, 1, 12)]);

    let empty = repo.summarize(site.id, SearchType::News).await.unwrap();
    assert_eq!(empty.total_rows, 0);
    assert!(empty.min_date.is_none());
    assert!(empty.dates.is_empty());
}

//! Integration tests for TriggerService and DiagnosticService.

use std::path::PathBuf;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::integration::common::{MockDatabase, MockLauncher, MockProbe, MockProvider, date, row};
use gsc_sync_core::traits::Liveness;
use gsc_sync_core::{
    AppError, DiagnosticService, JobCoordinator, JobStatus, ProgressService, ProgressView,
    RunRequest, SearchType, SilentSyncReporter, SyncConfig, TaskStatus, TriggerOutcome,
    TriggerService,
};

fn trigger_service(db: &MockDatabase, launcher: MockLauncher) -> TriggerService<MockDatabase, MockLauncher> {
    TriggerService::new(db.clone(), launcher, SyncConfig::default().with_log_dir("/var/lib/gsc-sync"))
}

#[tokio::test]
async fn test_trigger_creates_job_and_launches_worker() {
    // Arrange
    let db = MockDatabase::new();
    let launcher = MockLauncher::new();

    // Act
    let outcome = trigger_service(&db, launcher.clone()).trigger(Some(3)).await.unwrap();

    // Assert
    let expected_log = PathBuf::from("/var/lib/gsc-sync/sync-job-1.log");
    assert_eq!(
        outcome,
        TriggerOutcome::Started {
            job_id: 1,
            log_file: expected_log.clone(),
        }
    );

    let job = db.job(1);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.site_id, Some(3));
    assert_eq!(job.log_file, Some(expected_log.clone()));
    assert_eq!(job.pid, Some(MockLauncher::PID));

    let launched = launcher.launched();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].job_id, 1);
    assert_eq!(launched[0].site_id, Some(3));
    assert_eq!(launched[0].log_file, expected_log);
}

/// A worker that exits before attaching to its job is still detected as
/// crashed, and the job stops blocking new triggers.
#[tokio::test]
async fn test_worker_dying_before_attach_fails_job() {
    // Arrange
    let db = MockDatabase::new();
    let outcome = trigger_service(&db, MockLauncher::new()).trigger(None).await.unwrap();
    let probe = MockProbe::new().with(MockLauncher::PID, Liveness::Dead);

    // Act
    let view = ProgressService::new(db.clone(), probe, 30)
        .progress(None, Utc::now())
        .await
        .unwrap();

    // Assert
    match view {
        ProgressView::Job(progress) => {
            assert_eq!(progress.job_id, outcome.job_id());
            assert_eq!(progress.status, JobStatus::Error);
            assert!(progress.error_message.unwrap().starts_with("process crashed (PID 4242"));
        }
        ProgressView::Idle => panic!("expected the triggered job"),
    }

    let next = trigger_service(&db, MockLauncher::new()).trigger(None).await.unwrap();
    assert!(matches!(next, TriggerOutcome::Started { job_id: 2, .. }));
}

#[tokio::test]
async fn test_trigger_returns_active_job() {
    let db = MockDatabase::new();
    let active = db.running_job(Utc::now(), Some(10));
    let launcher = MockLauncher::new();

    let outcome = trigger_service(&db, launcher.clone()).trigger(None).await.unwrap();

    assert_eq!(outcome, TriggerOutcome::AlreadyRunning { job_id: active.id });
    assert!(launcher.launched().is_empty());
    assert_eq!(db.jobs().len(), 1);
}

/// Losing the creation race reports the winner instead of a second job.
#[tokio::test]
async fn test_trigger_race_returns_winner() {
    let db = MockDatabase::new();
    db.race_on_next_create();
    let launcher = MockLauncher::new();

    let outcome = trigger_service(&db, launcher.clone()).trigger(None).await.unwrap();

    assert_eq!(outcome, TriggerOutcome::AlreadyRunning { job_id: 1 });
    assert_eq!(db.jobs().len(), 1);
    assert!(launcher.launched().is_empty());
}

#[tokio::test]
async fn test_launch_failure_fails_job() {
    let db = MockDatabase::new();

    let result = trigger_service(&db, MockLauncher::failing()).trigger(None).await;

    assert!(matches!(result, Err(AppError::IoError(_))));
    let job = db.job(1);
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error_message.unwrap().starts_with("launch failed:"));

    // The failed job no longer blocks new triggers.
    let outcome = trigger_service(&db, MockLauncher::new()).trigger(None).await.unwrap();
    assert_eq!(outcome.job_id(), 2);
}

/// The diagnostic reports stored coverage, gaps and the last success.
#[tokio::test]
async fn test_diagnostic_after_sync() {
    // Arrange
    let db = MockDatabase::new();
    let site = db.add_site("https://example.com/");
    let provider = MockProvider::new().with_rows(
        "https://example.com/",
        SearchType::Web,
        vec![
            row(date(2024, 1, 10), 1),
            row(date(2024, 1, 10), 2),
            row(date(2024, 1, 11), 3),
            row(date(2024, 1, 16), 4),
        ],
    );
    let config = SyncConfig::default()
        .with_lookback_days(10)
        .with_api_latency_days(0)
        .with_chunk_size_days(5);
    JobCoordinator::new(provider, db.clone(), db.clone(), db.clone(), config)
        .run(
            &RunRequest {
                job_id: None,
                site_id: None,
                import_sites: false,
                today: date(2024, 1, 20),
            },
            &CancellationToken::new(),
            &SilentSyncReporter,
        )
        .await
        .unwrap();

    // Act
    let diagnostic = DiagnosticService::new(db.clone(), db.clone())
        .diagnose(site.id, SearchType::Web)
        .await
        .unwrap();

    // Assert
    assert_eq!(diagnostic.total_rows, 4);
    assert_eq!(diagnostic.min_date, Some(date(2024, 1, 10)));
    assert_eq!(diagnostic.max_date, Some(date(2024, 1, 16)));
    assert_eq!(diagnostic.days_with_data, 3);
    assert_eq!(diagnostic.missing_days, 4);
    assert_eq!(diagnostic.missing_dates.first(), Some(&date(2024, 1, 12)));

    let last = diagnostic.last_sync.unwrap();
    assert_eq!(last.status, TaskStatus::Success);
    assert_eq!(last.date_to, date(2024, 1, 19));
    assert_eq!(last.rows_fetched, 4);
}

#[tokio::test]
async fn test_diagnostic_without_data() {
    let db = MockDatabase::new();

    let diagnostic = DiagnosticService::new(db.clone(), db.clone())
        .diagnose(1, SearchType::Image)
        .await
        .unwrap();

    assert_eq!(diagnostic.total_rows, 0);
    assert!(diagnostic.missing_dates.is_empty());
    assert!(diagnostic.last_sync.is_none());
}

//! Integration tests for ProgressService and the liveness checks it runs.

use std::io::Write;

use chrono::{Duration, Utc};

use crate::integration::common::{MockDatabase, MockProbe};
use gsc_sync_core::traits::{Liveness, ProgressStore};
use gsc_sync_core::{
    AppError, Job, JobStatus, NewTaskRun, ProgressService, ProgressView, SearchType,
    TaskCompletion, TaskStatus,
};

const SITE: &str = "https://example.com/";
const TIMEOUT_MINUTES: u32 = 30;

fn service(db: &MockDatabase, probe: MockProbe) -> ProgressService<MockDatabase, MockProbe> {
    ProgressService::new(db.clone(), probe, TIMEOUT_MINUTES)
}

fn unwrap_job(view: ProgressView) -> Box<gsc_sync_core::JobProgress> {
    match view {
        ProgressView::Job(progress) => progress,
        ProgressView::Idle => panic!("expected a job view"),
    }
}

async fn start_task(db: &MockDatabase, job_id: i64, site_id: i64, chunks: i32) -> i64 {
    let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let id = db
        .start_task(&NewTaskRun {
            job_id: Some(job_id),
            site_id,
            search_type: SearchType::Web,
            date_from: day,
            date_to: day,
        })
        .await
        .unwrap();
    db.set_task_chunks(id, chunks).await.unwrap();
    id
}

#[tokio::test]
async fn test_idle_without_active_job() {
    let db = MockDatabase::new();

    let view = service(&db, MockProbe::new()).progress(None, Utc::now()).await.unwrap();

    assert_eq!(view, ProgressView::Idle);
}

#[tokio::test]
async fn test_unknown_job_id_is_not_found() {
    let db = MockDatabase::new();

    let result = service(&db, MockProbe::new()).progress(Some(12), Utc::now()).await;

    assert!(matches!(result, Err(AppError::JobNotFound(12))));
}

/// The view combines the job counters, the running task and finished tasks.
#[tokio::test]
async fn test_view_of_running_job() {
    // Arrange
    let db = MockDatabase::new();
    let site = db.add_site(SITE);
    let job = db.create_job(None).await.unwrap();
    db.start_job(job.id, 2).await.unwrap();

    let first = start_task(&db, job.id, site.id, 1).await;
    db.advance_task_chunk(first).await.unwrap();
    db.succeed_task(
        first,
        &TaskCompletion {
            rows_fetched: 10,
            rows_new: 7,
            rows_updated: 3,
            duration_sec: 1.25,
            effective_date_to: None,
        },
    )
    .await
    .unwrap();

    let second = start_task(&db, job.id, site.id, 4).await;
    db.advance_task_chunk(second).await.unwrap();
    db.advance_task_chunk(second).await.unwrap();

    // Act
    let progress = unwrap_job(service(&db, MockProbe::new()).progress(None, Utc::now()).await.unwrap());

    // Assert
    assert_eq!(progress.job_id, job.id);
    assert_eq!(progress.status, JobStatus::Running);
    assert_eq!(progress.completed_tasks, 1);

    let current = progress.current_task.as_ref().unwrap();
    assert_eq!(current.task_run_id, second);
    assert_eq!(current.site_url, SITE);
    assert_eq!((current.done_chunks, current.total_chunks), (2, 4));

    assert_eq!(progress.completed_list.len(), 1);
    assert_eq!(progress.completed_list[0].status, TaskStatus::Success);
    assert_eq!(progress.completed_list[0].rows_new, 7);
    assert!((progress.progress - 0.75).abs() < 1e-9);
}

/// A vanished worker fails the job with the tail of its log.
#[tokio::test]
async fn test_crash_detected_with_log_tail() {
    // Arrange
    let db = MockDatabase::new();
    let site = db.add_site(SITE);
    let job = db.running_job(Utc::now(), Some(77));
    let task = start_task(&db, job.id, site.id, 3).await;

    let mut log = tempfile::NamedTempFile::new().unwrap();
    for i in 1..=12 {
        writeln!(log, "line {i}").unwrap();
    }
    db.set_job_log_file(job.id, log.path()).await.unwrap();

    let probe = MockProbe::new().with(77, Liveness::Dead);

    // Act
    let progress = unwrap_job(service(&db, probe.clone()).progress(Some(job.id), Utc::now()).await.unwrap());

    // Assert
    assert_eq!(progress.status, JobStatus::Error);
    let message = progress.error_message.unwrap();
    assert!(message.starts_with("process crashed (PID 77 not found)\n--- last log lines ---\nline 3\n"));
    assert!(message.ends_with("line 12"));
    assert!(progress.current_task.is_none());
    assert!(probe.terminated().is_empty());

    let failed = db.tasks().into_iter().find(|t| t.id == task).unwrap();
    assert_eq!(failed.status, TaskStatus::Error);
}

/// An inconclusive probe never fails a job.
#[tokio::test]
async fn test_unknown_liveness_counts_as_alive() {
    let db = MockDatabase::new();
    let job = db.running_job(Utc::now(), Some(78));

    let progress = unwrap_job(
        service(&db, MockProbe::new())
            .progress(Some(job.id), Utc::now())
            .await
            .unwrap(),
    );

    assert_eq!(progress.status, JobStatus::Running);
    assert!(progress.error_message.is_none());
}

/// A job past its ceiling is signalled and failed with its running task.
#[tokio::test]
async fn test_timeout_signals_and_fails() {
    // Arrange
    let db = MockDatabase::new();
    let site = db.add_site(SITE);
    let now = Utc::now();
    let job = db.running_job(now - Duration::minutes(45), Some(88));
    let task = start_task(&db, job.id, site.id, 3).await;
    let probe = MockProbe::new().with(88, Liveness::Alive);
    let service = service(&db, probe.clone());

    // Act
    let progress = unwrap_job(service.progress(Some(job.id), now).await.unwrap());

    // Assert
    assert_eq!(progress.status, JobStatus::Error);
    assert_eq!(
        progress.error_message.as_deref(),
        Some("timeout: process exceeded 30 minutes (45.0 min elapsed)")
    );
    assert_eq!(probe.terminated(), vec![88]);

    let failed = db.tasks().into_iter().find(|t| t.id == task).unwrap();
    assert_eq!(failed.status, TaskStatus::Error);
    assert!((failed.duration_sec - 2700.0).abs() < 1e-6);

    // Polling again is a no-op.
    service.progress(Some(job.id), now).await.unwrap();
    assert_eq!(probe.terminated(), vec![88]);
}

/// An inconclusive probe does not spare a stalled worker the signal.
#[tokio::test]
async fn test_timeout_signals_when_liveness_unknown() {
    let db = MockDatabase::new();
    let now = Utc::now();
    let job = db.running_job(now - Duration::minutes(40), Some(89));
    let probe = MockProbe::new();

    let progress = unwrap_job(service(&db, probe.clone()).progress(Some(job.id), now).await.unwrap());

    assert_eq!(progress.status, JobStatus::Error);
    assert_eq!(probe.terminated(), vec![89]);
}

/// A dead worker past its ceiling is failed as crashed, without a signal.
#[tokio::test]
async fn test_dead_worker_past_timeout_is_not_signalled() {
    let db = MockDatabase::new();
    let now = Utc::now();
    let job = db.running_job(now - Duration::minutes(40), Some(90));
    let probe = MockProbe::new().with(90, Liveness::Dead);

    let progress = unwrap_job(service(&db, probe.clone()).progress(Some(job.id), now).await.unwrap());

    assert_eq!(progress.status, JobStatus::Error);
    assert!(progress.error_message.unwrap().starts_with("process crashed (PID 90"));
    assert!(probe.terminated().is_empty());
}

/// A job without a recorded process still times out.
#[tokio::test]
async fn test_timeout_without_pid() {
    let db = MockDatabase::new();
    let now = Utc::now();
    let job = db.running_job(now - Duration::minutes(31), None);
    let probe = MockProbe::new();

    let progress = unwrap_job(service(&db, probe.clone()).progress(Some(job.id), now).await.unwrap());

    assert_eq!(progress.status, JobStatus::Error);
    assert!(probe.terminated().is_empty());
}

/// Terminal jobs are never touched, even with a dead process.
#[tokio::test]
async fn test_terminal_job_is_left_alone() {
    let db = MockDatabase::new();
    let now = Utc::now();
    db.insert_job(Job {
        id: 5,
        site_id: None,
        status: JobStatus::Success,
        total_tasks: 0,
        completed_tasks: 0,
        started_at: now - Duration::hours(3),
        finished_at: Some(now - Duration::hours(2)),
        error_message: None,
        pid: Some(99),
        log_file: None,
    });
    let probe = MockProbe::new().with(99, Liveness::Dead);

    let progress = unwrap_job(service(&db, probe.clone()).progress(Some(5), now).await.unwrap());

    assert_eq!(progress.status, JobStatus::Success);
    assert!(progress.error_message.is_none());
    assert_eq!(progress.progress, 1.0);
    assert!(probe.terminated().is_empty());
}

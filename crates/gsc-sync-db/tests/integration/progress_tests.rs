//! Integration tests for ProgressRepository.

use std::path::Path;

use gsc_sync_core::config::SearchType;
use gsc_sync_core::error::AppError;
use gsc_sync_core::job::{JobStatus, NewTaskRun, TaskCompletion, TaskStatus};
use gsc_sync_core::traits::{ProgressStore, SiteStore};
use gsc_sync_db::{ProgressRepository, SiteRepository};
use sqlx::PgPool;

use crate::integration::common::{date, setup_test_db};

async fn site_id(pool: &PgPool) -> i64 {
    SiteRepository::new(pool.clone())
        .upsert_site("https://example.com/", None)
        .await
        .unwrap()
        .id
}

fn new_task(job_id: Option<i64>, site_id: i64, from: (u32, u32), to: (u32, u32)) -> NewTaskRun {
    NewTaskRun {
        job_id,
        site_id,
        search_type: SearchType::Web,
        date_from: date(2024, from.0, from.1),
        date_to: date(2024, to.0, to.1),
    }
}

fn completion(rows: i64, effective_date_to: Option<chrono::NaiveDate>) -> TaskCompletion {
    TaskCompletion {
        rows_fetched: rows,
        rows_new: rows,
        rows_updated: 0,
        duration_sec: 1.5,
        effective_date_to,
    }
}

#[tokio::test]
async fn test_job_lifecycle() {
    // Arrange
    let (pool, _container) = setup_test_db().await;
    let repo = ProgressRepository::new(pool);

    // Act
    let job = repo.create_job(Some(7)).await.unwrap();
    repo.set_job_pid(job.id, 1234).await.unwrap();
    repo.set_job_log_file(job.id, Path::new("/tmp/sync-job-1.log"))
        .await
        .unwrap();
    repo.start_job(job.id, 2).await.unwrap();
    repo.advance_job(job.id).await.unwrap();
    repo.advance_job(job.id).await.unwrap();
    repo.advance_job(job.id).await.unwrap();
    repo.succeed_job(job.id).await.unwrap();

    // Assert
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.site_id, Some(7));

    let stored = repo.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Success);
    assert_eq!(stored.total_tasks, 2);
    assert_eq!(stored.completed_tasks, 2, "advance is bounded by total_tasks");
    assert_eq!(stored.pid, Some(1234));
    assert_eq!(stored.log_file.as_deref(), Some(Path::new("/tmp/sync-job-1.log")));
    assert!(stored.finished_at.is_some());
    assert!(repo.find_active_job().await.unwrap().is_none());
}

/// The partial unique index admits one pending/running job at a time.
#[tokio::test]
async fn test_second_active_job_is_rejected() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProgressRepository::new(pool);

    let first = repo.create_job(None).await.unwrap();
    let second = repo.create_job(None).await;

    assert!(matches!(second, Err(AppError::ActiveJobExists)));
    assert_eq!(repo.find_active_job().await.unwrap().unwrap().id, first.id);

    // Once the first job ends a new one may start.
    repo.fail_job(first.id, "boom").await.unwrap();
    let third = repo.create_job(None).await.unwrap();
    assert_eq!(repo.find_active_job().await.unwrap().unwrap().id, third.id);
}

/// Terminal jobs and task runs ignore further transitions.
#[tokio::test]
async fn test_terminal_states_are_immutable() {
    let (pool, _container) = setup_test_db().await;
    let site = site_id(&pool).await;
    let repo = ProgressRepository::new(pool);

    let job = repo.create_job(None).await.unwrap();
    repo.start_job(job.id, 1).await.unwrap();
    let task = repo
        .start_task(&new_task(Some(job.id), site, (1, 1), (1, 5)))
        .await
        .unwrap();
    repo.fail_task(task, "first", 2.0).await.unwrap();
    repo.fail_job(job.id, "first").await.unwrap();

    repo.succeed_task(task, &completion(10, None)).await.unwrap();
    repo.fail_task(task, "second", 3.0).await.unwrap();
    repo.advance_task_chunk(task).await.unwrap();
    repo.succeed_job(job.id).await.unwrap();
    repo.fail_job(job.id, "second").await.unwrap();
    repo.advance_job(job.id).await.unwrap();

    let stored_job = repo.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored_job.status, JobStatus::Error);
    assert_eq!(stored_job.error_message.as_deref(), Some("first"));
    assert_eq!(stored_job.completed_tasks, 0);

    let tasks = repo.completed_tasks(job.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Error);
    assert_eq!(tasks[0].error_message.as_deref(), Some("first"));
    assert_eq!(tasks[0].rows_fetched, 0);
    assert_eq!(tasks[0].duration_sec, 2.0);
}

/// Ending a run as success or empty counts it on its job in the same write;
/// a repeated or late transition counts nothing.
#[tokio::test]
async fn test_finishing_task_advances_its_job() {
    let (pool, _container) = setup_test_db().await;
    let site = site_id(&pool).await;
    let repo = ProgressRepository::new(pool);
    let job = repo.create_job(None).await.unwrap();
    repo.start_job(job.id, 3).await.unwrap();

    let succeeded = repo
        .start_task(&new_task(Some(job.id), site, (1, 1), (1, 5)))
        .await
        .unwrap();
    repo.succeed_task(succeeded, &completion(3, None)).await.unwrap();
    assert_eq!(repo.find_job(job.id).await.unwrap().unwrap().completed_tasks, 1);

    let empty = repo
        .start_task(&new_task(Some(job.id), site, (1, 6), (1, 9)))
        .await
        .unwrap();
    repo.mark_task_empty(empty, 0.2).await.unwrap();
    assert_eq!(repo.find_job(job.id).await.unwrap().unwrap().completed_tasks, 2);

    repo.succeed_task(succeeded, &completion(3, None)).await.unwrap();
    repo.mark_task_empty(empty, 0.2).await.unwrap();
    assert_eq!(repo.find_job(job.id).await.unwrap().unwrap().completed_tasks, 2);

    let untracked = repo.start_task(&new_task(None, site, (1, 10), (1, 12))).await.unwrap();
    repo.succeed_task(untracked, &completion(1, None)).await.unwrap();
    assert_eq!(repo.find_job(job.id).await.unwrap().unwrap().completed_tasks, 2);
}

#[tokio::test]
async fn test_task_chunk_progress_is_bounded() {
    let (pool, _container) = setup_test_db().await;
    let site = site_id(&pool).await;
    let repo = ProgressRepository::new(pool);
    let job = repo.create_job(None).await.unwrap();

    let task = repo
        .start_task(&new_task(Some(job.id), site, (1, 1), (1, 10)))
        .await
        .unwrap();
    repo.set_task_chunks(task, 2).await.unwrap();
    for _ in 0..3 {
        repo.advance_task_chunk(task).await.unwrap();
    }

    let running = repo.find_running_task(job.id).await.unwrap().unwrap();
    assert_eq!(running.id, task);
    assert_eq!(running.site_url, "https://example.com/");
    assert_eq!(running.search_type, SearchType::Web);
    assert_eq!((running.done_chunks, running.total_chunks), (2, 2));
}

/// Success narrows `date_to`; an empty run keeps it and zeroes counters.
#[tokio::test]
async fn test_success_narrows_and_empty_keeps_date_to() {
    let (pool, _container) = setup_test_db().await;
    let site = site_id(&pool).await;
    let repo = ProgressRepository::new(pool);
    let job = repo.create_job(None).await.unwrap();

    let narrowed = repo
        .start_task(&new_task(Some(job.id), site, (1, 1), (1, 10)))
        .await
        .unwrap();
    repo.succeed_task(narrowed, &completion(40, Some(date(2024, 1, 7))))
        .await
        .unwrap();

    let empty = repo
        .start_task(&new_task(Some(job.id), site, (1, 8), (1, 12)))
        .await
        .unwrap();
    repo.mark_task_empty(empty, 0.4).await.unwrap();

    let tasks = repo.completed_tasks(job.id).await.unwrap();
    assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![narrowed, empty]);

    assert_eq!(tasks[0].status, TaskStatus::Success);
    assert_eq!(tasks[0].date_to, date(2024, 1, 7));
    assert_eq!(tasks[0].rows_inserted, 40);

    assert_eq!(tasks[1].status, TaskStatus::Empty);
    assert_eq!(tasks[1].date_to, date(2024, 1, 12));
    assert_eq!(tasks[1].rows_fetched, 0);
    assert!(repo.find_running_task(job.id).await.unwrap().is_none());
}

/// The resumption floor is the successful run with the greatest `date_to`.
#[tokio::test]
async fn test_last_success_uses_greatest_date_to() {
    let (pool, _container) = setup_test_db().await;
    let site = site_id(&pool).await;
    let repo = ProgressRepository::new(pool);

    let later = repo.start_task(&new_task(None, site, (1, 11), (1, 20))).await.unwrap();
    repo.succeed_task(later, &completion(5, None)).await.unwrap();
    let earlier = repo.start_task(&new_task(None, site, (1, 1), (1, 10))).await.unwrap();
    repo.succeed_task(earlier, &completion(5, None)).await.unwrap();
    let failed = repo.start_task(&new_task(None, site, (1, 21), (1, 30))).await.unwrap();
    repo.fail_task(failed, "boom", 1.0).await.unwrap();
    let empty = repo.start_task(&new_task(None, site, (1, 21), (1, 31))).await.unwrap();
    repo.mark_task_empty(empty, 1.0).await.unwrap();

    let last = repo.last_success(site, SearchType::Web).await.unwrap().unwrap();

    assert_eq!(last.id, later);
    assert_eq!(last.date_to, date(2024, 1, 20));
    assert!(repo.last_success(site, SearchType::Image).await.unwrap().is_none());

    let recent = repo.recent_tasks(2).await.unwrap();
    assert_eq!(recent.iter().map(|t| t.id).collect::<Vec<_>>(), vec![empty, failed]);
}

//! Job lifecycle against the SQLite store
//!
//! Drives jobs end to end through `JobManager` and `ReviewService`: draining,
//! retry escalation, operator requeue, pause/resume and cancellation.

mod common;

use std::time::Duration;

use common::{folder_job, Engine};
use docflow_core::application::{ReviewService, RunnerExit};
use docflow_core::domain::{
    DocumentStatus, ErrorKind, JobStatus, ListQuery, ProcessingMode, ReviewReason,
    ReviewResolution, ReviewStatus,
};
use docflow_core::port::mocks::{MockBehavior, MockProcessingUnit, MockSourceConnector};
use docflow_core::port::SourceError;
use docflow_core::AppError;

async fn count_with_status(engine: &Engine, job_id: &str, status: DocumentStatus) -> usize {
    engine
        .manager
        .list_documents(job_id, Some(status), &ListQuery::first(200))
        .await
        .unwrap()
        .data
        .len()
}

#[tokio::test]
async fn test_once_job_drains_and_pages() {
    let (engine, connector, processor) = Engine::with_mocks(
        MockSourceConnector::with_items(12),
        MockProcessingUnit::new_success(),
    )
    .await;
    let manager = &engine.manager;

    let mut config = folder_job("/inbox", ProcessingMode::Once, 5);
    config.options.parallel_workers = 4;
    let job = manager.create_job(config).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    manager.start_job(&job.id).await.unwrap();

    assert_eq!(engine.join(&job.id).await, Some(RunnerExit::Completed));
    assert_eq!(processor.call_count(), 12);
    assert!(processor.peak_in_flight() <= 4);
    assert_eq!(connector.batch_sizes(), vec![5, 5, 2]);

    let job = manager.get_job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_items, 12);
    assert_eq!(job.processed_items, 12);
    assert!(job.discovery_exhausted);
    assert!(job.counters_consistent());

    // Walk every page; no duplicates, nothing skipped
    let mut seen = Vec::new();
    let mut query = ListQuery::first(5);
    loop {
        let page = manager.list_documents(&job.id, None, &query).await.unwrap();
        assert!(page.data.len() <= 5);
        seen.extend(page.data.into_iter().map(|d| d.id));
        if !page.has_more {
            break;
        }
        query = query.after(page.next_cursor);
    }
    let unique: std::collections::HashSet<_> = seen.iter().collect();
    assert_eq!(seen.len(), 12);
    assert_eq!(unique.len(), 12);

    let completed = manager
        .list_jobs(Some(JobStatus::Completed), &ListQuery::first(10))
        .await
        .unwrap();
    assert_eq!(completed.data.len(), 1);
    assert_eq!(completed.data[0].id, job.id);

    engine.close().await;
}

#[tokio::test]
async fn test_exhausted_retries_escalate_and_review_retry_completes() {
    let (engine, _connector, processor) = Engine::with_mocks(
        MockSourceConnector::with_items(1),
        MockProcessingUnit::new_fail("ocr engine busy"),
    )
    .await;
    let manager = &engine.manager;
    let reviews = ReviewService::new(manager.clone());

    let mut config = folder_job("/inbox", ProcessingMode::Once, 10);
    config.options.max_retries = 2;
    let job = manager.create_job(config).await.unwrap();
    manager.start_job(&job.id).await.unwrap();
    assert_eq!(engine.join(&job.id).await, Some(RunnerExit::Completed));
    assert_eq!(processor.call_count(), 2);

    let done = manager.get_job(&job.id).await.unwrap();
    assert_eq!(done.needs_review_items, 1);
    assert_eq!(done.processed_items, 0);

    let open = reviews
        .list(Some(&job.id), Some(ReviewStatus::Open), &ListQuery::first(10))
        .await
        .unwrap();
    assert_eq!(open.data.len(), 1);
    let item = &open.data[0];
    assert_eq!(item.reason, ReviewReason::MaxRetriesExceeded);
    assert_eq!(item.error_kind, Some(ErrorKind::Transient));
    assert_eq!(item.retry_count, 2);
    assert_eq!(item.error_message.as_deref(), Some("ocr engine busy"));

    reviews
        .add_note(&item.id, "engine restarted, try again")
        .await
        .unwrap();

    processor.set_behavior(MockBehavior::Success);
    let record = reviews.retry(&item.id).await.unwrap();
    assert_eq!(record.documents.len(), 1);
    assert_eq!(record.documents[0].retry_count, 0);
    assert_eq!(record.documents[0].status, DocumentStatus::Pending);

    assert_eq!(engine.join(&job.id).await, Some(RunnerExit::Completed));
    let job = manager.get_job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_items, 1);
    assert_eq!(job.needs_review_items, 0);

    let closed = reviews.get(&item.id).await.unwrap();
    assert_eq!(closed.status, ReviewStatus::Resolved);
    assert_eq!(closed.resolution, Some(ReviewResolution::Retried));
    assert_eq!(closed.notes.len(), 1);
    assert!(closed.resolved_at.is_some());

    engine.close().await;
}

#[tokio::test]
async fn test_terminal_error_without_review_then_retry_failed() {
    let (engine, connector, processor) = Engine::with_mocks(
        MockSourceConnector::with_items(3),
        MockProcessingUnit::new_success(),
    )
    .await;
    processor.set_behavior_for(
        "/inbox/doc-0001.pdf",
        MockBehavior::Terminal("unsupported format".into()),
    );
    let manager = &engine.manager;

    let mut config = folder_job("/inbox", ProcessingMode::Once, 10);
    config.options.send_to_review_after_max_retries = false;
    let job = manager.create_job(config).await.unwrap();
    manager.start_job(&job.id).await.unwrap();
    assert_eq!(engine.join(&job.id).await, Some(RunnerExit::Completed));

    // Terminal errors are never retried
    assert_eq!(processor.attempts_for("/inbox/doc-0001.pdf"), 1);
    let done = manager.get_job(&job.id).await.unwrap();
    assert_eq!(done.processed_items, 2);
    assert_eq!(done.failed_items, 1);
    assert_eq!(done.needs_review_items, 0);
    assert_eq!(count_with_status(&engine, &job.id, DocumentStatus::Failed).await, 1);

    let reviews = ReviewService::new(manager.clone());
    let page = reviews
        .list(Some(&job.id), None, &ListQuery::first(10))
        .await
        .unwrap();
    assert!(page.data.is_empty());

    processor.set_behavior_for("/inbox/doc-0001.pdf", MockBehavior::Success);
    let record = manager.retry_failed(&job.id).await.unwrap();
    assert_eq!(record.documents.len(), 1);
    assert!(record.reviews.is_empty());
    assert_eq!(record.job.failed_items, 0);

    assert_eq!(engine.join(&job.id).await, Some(RunnerExit::Completed));
    let job = manager.get_job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_items, 3);
    assert_eq!(job.failed_items, 0);
    // Requeue does not rescan the source
    assert_eq!(connector.scan_count(), 1);

    engine.close().await;
}

#[tokio::test]
async fn test_transient_failures_recover_within_budget() {
    let (engine, _connector, processor) = Engine::with_mocks(
        MockSourceConnector::with_items(4),
        MockProcessingUnit::new(MockBehavior::FailTimes(2)),
    )
    .await;
    let manager = &engine.manager;

    let mut config = folder_job("/inbox", ProcessingMode::Once, 10);
    config.options.max_retries = 3;
    let job = manager.create_job(config).await.unwrap();
    manager.start_job(&job.id).await.unwrap();
    assert_eq!(engine.join(&job.id).await, Some(RunnerExit::Completed));

    let job = manager.get_job(&job.id).await.unwrap();
    assert_eq!(job.processed_items, 4);
    assert_eq!(job.needs_review_items, 0);
    assert_eq!(processor.call_count(), 12);

    let docs = manager
        .list_documents(&job.id, None, &ListQuery::first(10))
        .await
        .unwrap();
    for doc in docs.data {
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.retry_count, 2);
    }

    engine.close().await;
}

#[tokio::test]
async fn test_pause_holds_dispatch_and_resume_finishes_without_duplicates() {
    let (engine, _connector, processor) = Engine::with_mocks(
        MockSourceConnector::with_items(20),
        MockProcessingUnit::new(MockBehavior::Delay(Duration::from_millis(50))),
    )
    .await;
    let manager = &engine.manager;

    let mut config = folder_job("/inbox", ProcessingMode::Once, 20);
    config.options.parallel_workers = 2;
    let job = manager.create_job(config).await.unwrap();
    manager.start_job(&job.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    let paused = manager.pause_job(&job.id).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);

    // In-flight work settles, then nothing moves
    tokio::time::sleep(Duration::from_millis(200)).await;
    let calls = processor.call_count();
    let completed = count_with_status(&engine, &job.id, DocumentStatus::Completed).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(processor.call_count(), calls);
    assert_eq!(
        count_with_status(&engine, &job.id, DocumentStatus::Completed).await,
        completed
    );
    assert!(completed < 20);
    assert_eq!(count_with_status(&engine, &job.id, DocumentStatus::Processing).await, 0);

    // Only paused jobs resume
    assert!(matches!(
        manager.start_job(&job.id).await,
        Err(AppError::InvalidState(_))
    ));

    manager.resume_job(&job.id).await.unwrap();
    assert_eq!(engine.join(&job.id).await, Some(RunnerExit::Completed));
    assert_eq!(processor.call_count(), 20);
    for i in 0..20 {
        assert_eq!(processor.attempts_for(&format!("/inbox/doc-{:04}.pdf", i)), 1);
    }

    engine.close().await;
}

#[tokio::test]
async fn test_cancel_finishes_in_flight_and_cancels_pending() {
    let (engine, _connector, processor) = Engine::with_mocks(
        MockSourceConnector::with_items(10),
        MockProcessingUnit::new_success(),
    )
    .await;
    let gate = processor.gated();
    let manager = &engine.manager;

    let mut config = folder_job("/inbox", ProcessingMode::Once, 10);
    config.options.parallel_workers = 2;
    let job = manager.create_job(config).await.unwrap();
    manager.start_job(&job.id).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while processor.in_flight() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let stopped = manager.cancel_job(&job.id).await.unwrap();
    assert_eq!(stopped.status, JobStatus::Stopped);
    gate.add_permits(10);
    assert_eq!(engine.join(&job.id).await, Some(RunnerExit::Stopped));

    assert_eq!(processor.call_count(), 2);
    assert_eq!(count_with_status(&engine, &job.id, DocumentStatus::Completed).await, 2);
    assert_eq!(count_with_status(&engine, &job.id, DocumentStatus::Cancelled).await, 8);
    assert_eq!(count_with_status(&engine, &job.id, DocumentStatus::Pending).await, 0);

    assert!(matches!(
        manager.resume_job(&job.id).await,
        Err(AppError::InvalidState(_))
    ));
    assert!(matches!(
        manager.retry_failed(&job.id).await,
        Err(AppError::InvalidState(_))
    ));

    engine.close().await;
}

#[tokio::test]
async fn test_misconfigured_source_fails_job() {
    let (engine, _connector, processor) = Engine::with_mocks(
        MockSourceConnector::failing(SourceError::Config("folder does not exist: /inbox".into())),
        MockProcessingUnit::new_success(),
    )
    .await;
    let manager = &engine.manager;

    let job = manager
        .create_job(folder_job("/inbox", ProcessingMode::Once, 10))
        .await
        .unwrap();
    manager.start_job(&job.id).await.unwrap();
    assert_eq!(engine.join(&job.id).await, Some(RunnerExit::DiscoveryFailed));

    let job = manager.get_job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.failure_reason.unwrap().contains("folder does not exist"));
    assert_eq!(processor.call_count(), 0);

    engine.close().await;
}

#[tokio::test]
async fn test_continuous_job_picks_up_late_arrivals() {
    let (engine, connector, _processor) = Engine::with_mocks(
        MockSourceConnector::with_items(2),
        MockProcessingUnit::new_success(),
    )
    .await;
    let manager = &engine.manager;

    let job = manager
        .create_job(folder_job("/inbox", ProcessingMode::Continuous, 10))
        .await
        .unwrap();
    manager.start_job(&job.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    connector.push_item("/inbox/late-arrival.pdf");

    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let job = manager.get_job(&job.id).await.unwrap();
            if job.processed_items == 3 {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(settled.status, JobStatus::Running);
    assert_eq!(settled.total_items, 3);

    manager.cancel_job(&job.id).await.unwrap();
    assert_eq!(engine.join(&job.id).await, Some(RunnerExit::Stopped));

    engine.close().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected_with_every_field() {
    let (engine, _connector, _processor) = Engine::with_mocks(
        MockSourceConnector::with_items(0),
        MockProcessingUnit::new_success(),
    )
    .await;

    let mut config = folder_job("  ", ProcessingMode::Once, 0);
    config.options.max_retries = 0;
    let err = engine.manager.create_job(config).await.unwrap_err();
    let AppError::Validation(validation) = err else {
        panic!("expected validation error, got {err:?}");
    };
    let fields = validation.fields();
    assert!(fields.contains(&"source.path"));
    assert!(fields.contains(&"processing.batch_size"));
    assert!(fields.contains(&"options.max_retries"));

    let jobs = engine
        .manager
        .list_jobs(None, &ListQuery::default())
        .await
        .unwrap();
    assert!(jobs.data.is_empty());

    engine.close().await;
}

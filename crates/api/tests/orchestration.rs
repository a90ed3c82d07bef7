//! Process lifecycle tests: real `/bin/sh` workers against the in-memory
//! job store.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use common::{
    dataset_root, fast_config, shell_launcher, wait_for_job, wait_terminal, wait_until,
    FullProgressLauncher, RecordingLauncher,
};
use labelbench_api::engine::dispatcher::DispatcherState;
use labelbench_api::engine::launcher::CommandLauncher;
use labelbench_api::orchestrator::{CancelAction, Orchestrator, OrchestratorError};
use labelbench_core::error::CoreError;
use labelbench_db::models::job::{JobPatch, NewJob};
use labelbench_db::models::status::JobStatus;
use labelbench_db::{JobStore, MemoryJobStore};
use uuid::Uuid;

fn new_job(total_units: i32, batch_id: Option<Uuid>, variant: &str) -> NewJob {
    NewJob {
        engine: "easyocr".into(),
        dataset_ref: "v1".into(),
        variant: variant.into(),
        total_units,
        batch_id,
    }
}

fn variants(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Exit reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_zero_exit_fails_job_with_exit_code() {
    let data = dataset_root(2);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("exit 3")),
        fast_config(data.path()),
    );
    orchestrator.start();

    let job = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    assert_eq!(job.status(), JobStatus::Pending);
    assert_eq!(job.total_units, 2);

    let job = wait_terminal(store.as_ref(), job.id).await;
    assert_eq!(job.status(), JobStatus::Failed);
    let message = job.error_message.unwrap();
    assert!(message.contains("exit code 3"), "{message}");
    assert!(message.contains("0/2"), "{message}");
    assert!(job.completed_at.is_some());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn clean_exit_with_full_progress_completes_job() {
    let data = dataset_root(3);
    let store = Arc::new(MemoryJobStore::new());
    let launcher = FullProgressLauncher {
        store: store.clone(),
        inner: shell_launcher("exit 0"),
    };
    let orchestrator =
        Orchestrator::new(store.clone(), Arc::new(launcher), fast_config(data.path()));
    orchestrator.start();

    let job = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    let job = wait_terminal(store.as_ref(), job.id).await;

    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.processed_units, 3);
    assert!(job.error_message.is_none());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn clean_exit_without_progress_fails_job() {
    let data = dataset_root(2);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("exit 0")),
        fast_config(data.path()),
    );
    orchestrator.start();

    let job = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    let job = wait_terminal(store.as_ref(), job.id).await;

    assert_eq!(job.status(), JobStatus::Failed);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Worker exited with exit code 0 after 0/2 units")
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn killed_worker_reports_signal() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("kill -9 $$")),
        fast_config(data.path()),
    );
    orchestrator.start();

    let job = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    let job = wait_terminal(store.as_ref(), job.id).await;

    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("signal 9"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn store_outage_at_worker_exit_still_settles_job() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("sleep 0.5; exit 3")),
        fast_config(data.path()),
    );
    orchestrator.start();

    let job = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    wait_for_job(store.as_ref(), job.id, |j| j.status() == JobStatus::Running).await;

    // At capacity the dispatcher leaves the store alone, so these failures
    // are spent by the watchdog. Forty outlast several retry budgets.
    store.inject_transient_failures(40);
    tokio::time::sleep(Duration::from_millis(800)).await;

    let job = wait_terminal(store.as_ref(), job.id).await;
    assert_eq!(job.status(), JobStatus::Failed);
    let message = job.error_message.unwrap();
    assert!(message.contains("exit code 3"), "{message}");
    wait_until("worker deregistered", || orchestrator.live_workers() == 0).await;

    orchestrator.shutdown().await;
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_workers_never_exceed_limit() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let mut config = fast_config(data.path());
    config.max_concurrent_workers = 2;
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("sleep 0.2")),
        config,
    );
    orchestrator.start();

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(orchestrator.submit("easyocr", "v1", "none").await.unwrap().id);
    }

    let peak = Arc::new(AtomicUsize::new(0));
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        peak.fetch_max(orchestrator.live_workers(), Ordering::SeqCst);
        let mut all_done = true;
        for id in &ids {
            all_done &= store.get(*id).await.unwrap().unwrap().is_terminal();
        }
        if all_done {
            break;
        }
        assert!(Instant::now() < deadline, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "observed {peak} live workers");
    assert!(peak >= 1);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn second_job_waits_for_first() {
    let data = dataset_root(10);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("sleep 0.4")),
        fast_config(data.path()),
    );
    orchestrator.start();

    let a = orchestrator.submit("easyocr", "v1", "none").await.unwrap().id;
    let b = orchestrator.submit("easyocr", "v1", "none").await.unwrap().id;

    wait_for_job(store.as_ref(), a, |job| job.status() == JobStatus::Running).await;
    let pending = orchestrator.status(b).await.unwrap();
    assert_eq!(pending.status(), JobStatus::Pending);
    assert!(pending.started_at.is_none());
    wait_until("occupied dispatcher", || {
        orchestrator.dispatcher_state() == DispatcherState::Occupied
    })
    .await;

    let first = wait_terminal(store.as_ref(), a).await;
    let second = wait_for_job(store.as_ref(), b, |job| job.started_at.is_some()).await;
    assert!(second.started_at.unwrap() >= first.completed_at.unwrap());

    wait_terminal(store.as_ref(), b).await;
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn launch_failure_fails_job() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let launcher = Arc::new(RecordingLauncher::new(CommandLauncher::new(
        "/nonexistent/labelbench-worker",
    )));
    let orchestrator = Orchestrator::new(store.clone(), launcher.clone(), fast_config(data.path()));
    orchestrator.start();

    let job = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    let job = wait_terminal(store.as_ref(), job.id).await;

    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job
        .error_message
        .unwrap()
        .starts_with("Failed to launch worker"));
    // Two attempts per fast_config.
    assert_eq!(launcher.launches().len(), 2);
    assert_eq!(orchestrator.live_workers(), 0);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn pending_rows_are_recovered_on_start() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let single = store.create(new_job(1, None, "none")).await.unwrap();
    let batch_id = Uuid::now_v7();
    let batch = store
        .create_batch(vec![
            new_job(1, Some(batch_id), "none"),
            new_job(1, Some(batch_id), "rescale"),
        ])
        .await
        .unwrap();

    let launcher = Arc::new(RecordingLauncher::new(shell_launcher("exit 1")));
    let orchestrator = Orchestrator::new(store.clone(), launcher.clone(), fast_config(data.path()));
    orchestrator.start();

    wait_terminal(store.as_ref(), single.id).await;
    for job in &batch {
        wait_terminal(store.as_ref(), job.id).await;
    }

    assert_eq!(
        launcher.launches(),
        vec![vec![single.id], vec![batch[0].id, batch[1].id]]
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn running_rows_from_previous_instance_fail_on_start() {
    let data = dataset_root(3);
    let store = Arc::new(MemoryJobStore::new());
    let orphan = store.create(new_job(3, None, "none")).await.unwrap();
    store
        .update(orphan.id, &JobPatch::status(JobStatus::Running).with_progress(1))
        .await
        .unwrap();

    let launcher = Arc::new(RecordingLauncher::new(shell_launcher("exit 1")));
    let orchestrator = Orchestrator::new(store.clone(), launcher.clone(), fast_config(data.path()));
    orchestrator.start();

    let job = wait_terminal(store.as_ref(), orphan.id).await;
    assert_eq!(job.status(), JobStatus::Failed);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Worker lost: server restarted after 1/3 units")
    );
    assert!(launcher.launches().is_empty());
    assert_eq!(orchestrator.live_workers(), 0);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn batch_runs_in_one_process() {
    let data = dataset_root(2);
    let store = Arc::new(MemoryJobStore::new());
    let launcher = Arc::new(RecordingLauncher::new(shell_launcher("exit 0")));
    let orchestrator = Orchestrator::new(store.clone(), launcher.clone(), fast_config(data.path()));
    orchestrator.start();

    let jobs = orchestrator
        .submit_batch("easyocr", "v1", &variants(&["none", "rescale", "deskew"]))
        .await
        .unwrap();
    assert_eq!(jobs.len(), 3);
    let batch_id = jobs[0].batch_id.unwrap();
    assert!(jobs.iter().all(|job| job.batch_id == Some(batch_id)));

    for job in &jobs {
        wait_terminal(store.as_ref(), job.id).await;
    }
    let ids: Vec<_> = jobs.iter().map(|job| job.id).collect();
    assert_eq!(launcher.launches(), vec![ids]);

    orchestrator.shutdown().await;
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_terminates_live_worker() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("sleep 30")),
        fast_config(data.path()),
    );
    orchestrator.start();

    let job = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    wait_for_job(store.as_ref(), job.id, |job| job.status() == JobStatus::Running).await;
    assert_eq!(orchestrator.live_workers(), 1);

    let started = Instant::now();
    let report = orchestrator.cancel(job.id).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(report.action, CancelAction::Cancelled);
    assert_eq!(report.affected_job_ids, vec![job.id]);
    assert!(report.process_terminated);
    assert!(!report.shared_process);

    let job = orchestrator.status(job.id).await.unwrap();
    assert_eq!(job.status(), JobStatus::Cancelled);
    wait_until("worker deregistration", || orchestrator.live_workers() == 0).await;

    // The watchdog must not overwrite the cancellation.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let job = orchestrator.status(job.id).await.unwrap();
    assert_eq!(job.status(), JobStatus::Cancelled);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn cancel_queued_job_never_launches_it() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let launcher = Arc::new(RecordingLauncher::new(shell_launcher("sleep 30")));
    let orchestrator = Orchestrator::new(store.clone(), launcher.clone(), fast_config(data.path()));
    orchestrator.start();

    let first = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    let queued = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    wait_for_job(store.as_ref(), first.id, |job| job.status() == JobStatus::Running).await;

    let report = orchestrator.cancel(queued.id).await.unwrap();
    assert!(!report.process_terminated);
    assert_eq!(
        orchestrator.status(queued.id).await.unwrap().status(),
        JobStatus::Cancelled
    );

    orchestrator.cancel(first.id).await.unwrap();
    wait_until("worker deregistration", || orchestrator.live_workers() == 0).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(launcher.launches(), vec![vec![first.id]]);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn cancelling_batch_member_cancels_siblings() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("sleep 30")),
        fast_config(data.path()),
    );
    orchestrator.start();

    let jobs = orchestrator
        .submit_batch("easyocr", "v1", &variants(&["none", "rescale", "deskew"]))
        .await
        .unwrap();
    wait_for_job(store.as_ref(), jobs[0].id, |job| job.status() == JobStatus::Running).await;
    // Later members wait for the worker to reach them.
    assert_eq!(
        orchestrator.status(jobs[2].id).await.unwrap().status(),
        JobStatus::Pending
    );

    let report = orchestrator.cancel(jobs[1].id).await.unwrap();
    assert!(report.shared_process);
    assert!(report.process_terminated);
    assert_eq!(report.affected_job_ids[0], jobs[1].id);
    assert_eq!(report.affected_job_ids.len(), 3);

    for job in &jobs {
        let job = orchestrator.status(job.id).await.unwrap();
        assert_eq!(job.status(), JobStatus::Cancelled);
    }

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn cancel_terminal_job_conflicts() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("exit 2")),
        fast_config(data.path()),
    );
    orchestrator.start();

    let job = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    wait_terminal(store.as_ref(), job.id).await;

    let err = orchestrator.cancel(job.id).await.unwrap_err();
    assert_matches!(err, OrchestratorError::Core(CoreError::Conflict(_)));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn delete_terminates_worker_before_removing_row() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("sleep 30")),
        fast_config(data.path()),
    );
    orchestrator.start();

    let job = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    wait_for_job(store.as_ref(), job.id, |job| job.status() == JobStatus::Running).await;

    let report = orchestrator.delete(job.id).await.unwrap();
    assert_eq!(report.action, CancelAction::Deleted);
    assert!(report.process_terminated);
    assert!(store.get(job.id).await.unwrap().is_none());
    wait_until("worker deregistration", || orchestrator.live_workers() == 0).await;

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn shutdown_leaves_no_running_job() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("sleep 30")),
        fast_config(data.path()),
    );
    orchestrator.start();

    let job = orchestrator.submit("easyocr", "v1", "none").await.unwrap();
    wait_for_job(store.as_ref(), job.id, |job| job.status() == JobStatus::Running).await;

    orchestrator.shutdown().await;

    assert_eq!(orchestrator.live_workers(), 0);
    let job = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Failed);
}

// ---------------------------------------------------------------------------
// Submission validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submissions_are_validated_before_creating_rows() {
    let data = dataset_root(1);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(shell_launcher("exit 0")),
        fast_config(data.path()),
    );

    assert_matches!(
        orchestrator.submit("tesseract", "v1", "none").await,
        Err(OrchestratorError::Core(CoreError::Validation(_)))
    );
    assert_matches!(
        orchestrator.submit("easyocr", "v1", "sharpen").await,
        Err(OrchestratorError::Core(CoreError::Validation(_)))
    );
    assert_matches!(
        orchestrator.submit("easyocr", "v9", "none").await,
        Err(OrchestratorError::Dataset(_))
    );
    assert_matches!(
        orchestrator.submit("easyocr", "empty", "none").await,
        Err(OrchestratorError::Dataset(_))
    );
    assert_matches!(
        orchestrator.submit_batch("easyocr", "v1", &[]).await,
        Err(OrchestratorError::Core(CoreError::Validation(_)))
    );

    assert!(store.list(10).await.unwrap().is_empty());
    assert_eq!(orchestrator.queued_items(), 0);
}

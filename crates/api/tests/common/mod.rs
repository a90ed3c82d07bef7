#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use labelbench_api::config::{OrchestratorConfig, ServerConfig};
use labelbench_api::engine::launcher::{CommandLauncher, LaunchError, WorkerLauncher};
use labelbench_api::orchestrator::Orchestrator;
use labelbench_api::router::build_app_router;
use labelbench_api::state::AppState;
use labelbench_core::types::JobId;
use labelbench_db::models::job::{JobPatch, JobRecord};
use labelbench_db::{JobStore, MemoryJobStore};
use tempfile::TempDir;
use tokio::process::Child;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

/// Orchestrator settings with short intervals so lifecycle tests finish
/// quickly.
pub fn fast_config(datasets_dir: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        max_concurrent_workers: 1,
        dispatch_poll_interval: Duration::from_millis(20),
        watchdog_poll_interval: Duration::from_millis(20),
        kill_grace_period: Duration::from_secs(1),
        launch_attempts: 2,
        launch_retry_delay: Duration::from_millis(10),
        reconcile_tolerance: Duration::from_millis(50),
        worker_binary: PathBuf::from("/bin/false"),
        datasets_dir: datasets_dir.to_path_buf(),
    }
}

/// A dataset root holding version `v1` with `units` placeholder images.
///
/// Only the orchestrator reads these (to count units); no worker decodes
/// them in these tests.
pub fn dataset_root(units: usize) -> TempDir {
    let root = tempfile::tempdir().unwrap();
    let images = root.path().join("v1").join("images");
    std::fs::create_dir_all(&images).unwrap();
    for i in 0..units {
        std::fs::write(images.join(format!("unit_{i:02}.jpg")), b"jpeg").unwrap();
    }
    std::fs::create_dir_all(root.path().join("empty").join("images")).unwrap();
    root
}

/// Launches `/bin/sh -c <script> worker --job-id <id> ...`.
pub fn shell_launcher(script: &str) -> CommandLauncher {
    CommandLauncher::new("/bin/sh").with_args(["-c", script, "worker"])
}

/// Wraps a launcher and records the job ids of every launch.
pub struct RecordingLauncher<L> {
    inner: L,
    pub launches: Mutex<Vec<Vec<JobId>>>,
}

impl<L> RecordingLauncher<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            launches: Mutex::new(Vec::new()),
        }
    }

    pub fn launches(&self) -> Vec<Vec<JobId>> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl<L: WorkerLauncher> WorkerLauncher for RecordingLauncher<L> {
    async fn launch(&self, job_ids: &[JobId]) -> Result<Child, LaunchError> {
        self.launches.lock().unwrap().push(job_ids.to_vec());
        self.inner.launch(job_ids).await
    }
}

/// Writes full progress for every job before spawning the process, standing
/// in for a worker that processed every unit but died before its final
/// status write.
pub struct FullProgressLauncher {
    pub store: Arc<MemoryJobStore>,
    pub inner: CommandLauncher,
}

#[async_trait]
impl WorkerLauncher for FullProgressLauncher {
    async fn launch(&self, job_ids: &[JobId]) -> Result<Child, LaunchError> {
        for &id in job_ids {
            let job = self.store.get(id).await.unwrap().unwrap();
            self.store
                .update(id, &JobPatch::progress(job.total_units))
                .await
                .unwrap();
        }
        self.inner.launch(job_ids).await
    }
}

/// Poll the store until `done` holds for the job or ten seconds pass.
pub async fn wait_for_job<F>(store: &dyn JobStore, id: JobId, mut done: F) -> JobRecord
where
    F: FnMut(&JobRecord) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        // Injected store failures surface here as errors; keep polling.
        if let Ok(Some(job)) = store.get(id).await {
            if done(&job) {
                return job;
            }
        }
        assert!(Instant::now() < deadline, "timed out waiting for job {id}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_terminal(store: &dyn JobStore, id: JobId) -> JobRecord {
    wait_for_job(store, id, JobRecord::is_terminal).await
}

/// Poll until `check` holds or ten seconds pass.
pub async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Build the full application router exactly as `main.rs` does, around an
/// orchestrator backed by the given store and launcher.
pub fn build_test_app(
    store: Arc<MemoryJobStore>,
    launcher: Arc<dyn WorkerLauncher>,
    datasets_dir: &Path,
) -> (Router, Arc<Orchestrator>) {
    let config = test_config();
    let orchestrator = Orchestrator::new(store, launcher, fast_config(datasets_dir));
    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        config: Arc::new(config.clone()),
    };
    (build_app_router(state, &config), orchestrator)
}

pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post_json(app: Router, uri: &str, json: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(json)).await
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri, None).await
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, None).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn expect_status(response: Response<Body>, status: StatusCode) -> serde_json::Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}

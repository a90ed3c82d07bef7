use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Budget for draining workers on shutdown, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `8000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:3000`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
        }
    }
}

/// Dispatcher, watchdog and launch settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum live worker processes (default: `1`).
    pub max_concurrent_workers: usize,
    /// Fallback dispatcher wake-up when nothing signals it (default: 1 s).
    pub dispatch_poll_interval: Duration,
    /// Watchdog liveness polling interval (default: 500 ms).
    pub watchdog_poll_interval: Duration,
    /// Time between SIGTERM and SIGKILL when terminating a worker (default: 5 s).
    pub kill_grace_period: Duration,
    /// Spawn attempts before the jobs are marked failed (default: `3`).
    pub launch_attempts: u32,
    /// Delay between spawn attempts (default: 200 ms).
    pub launch_retry_delay: Duration,
    /// Window after the last progress write in which an exit is re-checked
    /// before reconciling (default: 250 ms).
    pub reconcile_tolerance: Duration,
    /// Worker executable (default: `labelbench-worker` on `PATH`).
    pub worker_binary: PathBuf,
    /// Root of the dataset directories (default: `./test_data_OCR`).
    pub datasets_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 1,
            dispatch_poll_interval: Duration::from_millis(1000),
            watchdog_poll_interval: Duration::from_millis(500),
            kill_grace_period: Duration::from_secs(5),
            launch_attempts: 3,
            launch_retry_delay: Duration::from_millis(200),
            reconcile_tolerance: Duration::from_millis(250),
            worker_binary: PathBuf::from("labelbench-worker"),
            datasets_dir: PathBuf::from("./test_data_OCR"),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default             |
    /// |------------------------------|---------------------|
    /// | `MAX_CONCURRENT_WORKERS`     | `1`                 |
    /// | `DISPATCH_POLL_INTERVAL_MS`  | `1000`              |
    /// | `WATCHDOG_POLL_INTERVAL_MS`  | `500`               |
    /// | `KILL_GRACE_PERIOD_SECS`     | `5`                 |
    /// | `LAUNCH_ATTEMPTS`            | `3`                 |
    /// | `RECONCILE_TOLERANCE_MS`     | `250`               |
    /// | `WORKER_BINARY`              | `labelbench-worker` |
    /// | `DATASETS_DIR`               | `./test_data_OCR`   |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_concurrent_workers: usize = std::env::var("MAX_CONCURRENT_WORKERS")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("MAX_CONCURRENT_WORKERS must be a valid usize");

        Self {
            max_concurrent_workers: max_concurrent_workers.max(1),
            dispatch_poll_interval: millis("DISPATCH_POLL_INTERVAL_MS", 1000),
            watchdog_poll_interval: millis("WATCHDOG_POLL_INTERVAL_MS", 500),
            kill_grace_period: Duration::from_secs(
                std::env::var("KILL_GRACE_PERIOD_SECS")
                    .unwrap_or_else(|_| "5".into())
                    .parse()
                    .expect("KILL_GRACE_PERIOD_SECS must be a valid u64"),
            ),
            launch_attempts: std::env::var("LAUNCH_ATTEMPTS")
                .unwrap_or_else(|_| "3".into())
                .parse::<u32>()
                .expect("LAUNCH_ATTEMPTS must be a valid u32")
                .max(1),
            reconcile_tolerance: millis("RECONCILE_TOLERANCE_MS", 250),
            worker_binary: std::env::var("WORKER_BINARY")
                .map(PathBuf::from)
                .unwrap_or(defaults.worker_binary),
            datasets_dir: std::env::var("DATASETS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.datasets_dir),
            ..defaults
        }
    }
}

fn millis(name: &str, default: u64) -> Duration {
    let ms: u64 = match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid u64")),
        Err(_) => default,
    };
    Duration::from_millis(ms)
}

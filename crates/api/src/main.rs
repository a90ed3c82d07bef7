use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use labelbench_api::config::{OrchestratorConfig, ServerConfig};
use labelbench_api::engine::launcher::CommandLauncher;
use labelbench_api::orchestrator::Orchestrator;
use labelbench_api::router::build_app_router;
use labelbench_api::state::AppState;
use labelbench_db::PgJobStore;

/// Connections held by the API process. Workers open their own pools.
const API_POOL_SIZE: u32 = 10;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "labelbench_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let orchestrator_config = OrchestratorConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        max_concurrent_workers = orchestrator_config.max_concurrent_workers,
        worker_binary = %orchestrator_config.worker_binary.display(),
        datasets_dir = %orchestrator_config.datasets_dir.display(),
        "Loaded orchestrator configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = labelbench_db::create_pool(&database_url, API_POOL_SIZE)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    labelbench_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    labelbench_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Orchestrator ---
    let store = Arc::new(PgJobStore::new(pool));
    let launcher = Arc::new(
        CommandLauncher::new(&orchestrator_config.worker_binary).with_env(
            "DATASETS_DIR",
            orchestrator_config.datasets_dir.to_string_lossy(),
        ),
    );
    let orchestrator = Orchestrator::new(store, launcher, orchestrator_config);
    orchestrator.start();
    tracing::info!("Orchestrator started");

    // --- App state ---
    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping workers");

    let budget = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(budget, orchestrator.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "Orchestrator shutdown timed out",
        );
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use labelbench_core::engine::OcrEngine;
use labelbench_db::PgJobStore;
use labelbench_worker::config::WorkerConfig;
use labelbench_worker::detector::{DetectorSettings, HttpDetector};
use labelbench_worker::recognizer::HttpRecognizer;
use labelbench_worker::{RunnerSettings, WorkerRunner};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Run one job, or several as a batch, then exit.
#[derive(Debug, Parser)]
#[command(name = "labelbench-worker", version)]
struct Cli {
    /// Job to run. Repeat to run a batch sequentially in this process.
    #[arg(long = "job-id", required = true)]
    job_ids: Vec<Uuid>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "labelbench_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env().map_err(anyhow::Error::msg)?;
    tracing::info!(jobs = cli.job_ids.len(), pid = std::process::id(), "Worker starting");

    let pool = labelbench_db::create_pool(&config.database_url, 2)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(PgJobStore::new(pool));

    let http = reqwest::Client::new();
    let detector = Arc::new(HttpDetector::with_client(
        http.clone(),
        config.detector_url.clone(),
        config.detector_api_key.clone(),
        DetectorSettings {
            confidence_threshold: config.detection_confidence_threshold,
            padding_px: config.crop_padding_px,
            max_dimension: config.detection_max_dimension,
            image_timeout: config.image_timeout,
        },
    ));

    let mut runner = WorkerRunner::new(
        store,
        detector,
        RunnerSettings {
            datasets_dir: config.datasets_dir.clone(),
            unit_timeout: config.unit_timeout,
            detection_timeout: config.detection_timeout,
        },
    );
    for engine in OcrEngine::ALL {
        runner = runner.with_recognizer(Arc::new(HttpRecognizer::new(
            http.clone(),
            config.ocr_service_url.clone(),
            engine,
            config.ocr_confidence_threshold,
        )));
    }

    runner
        .run_batch(&cli.job_ids)
        .await
        .context("Worker run failed")?;

    tracing::info!("Worker finished");
    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

/// Worker process configuration loaded from environment variables.
///
/// All fields have defaults except `database_url`; the detector and OCR
/// service URLs default to local sidecars.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub datasets_dir: PathBuf,
    /// Per-unit wall-clock budget. Zero disables it.
    pub unit_timeout: Option<Duration>,
    /// Budget for the detection call inside a unit. Zero disables it.
    pub detection_timeout: Option<Duration>,
    pub detector_url: String,
    pub detector_api_key: String,
    pub detection_confidence_threshold: f64,
    pub ocr_service_url: String,
    pub ocr_confidence_threshold: f64,
    pub crop_padding_px: u32,
    pub detection_max_dimension: u32,
    /// Budget for each blocking image decode or crop. Zero disables it.
    pub image_timeout: Option<Duration>,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable                          | Default                    |
    /// |-----------------------------------|----------------------------|
    /// | `DATABASE_URL`                    | (required)                 |
    /// | `DATASETS_DIR`                    | `./test_data_OCR`          |
    /// | `UNIT_TIMEOUT_SECS`               | `120`                      |
    /// | `DETECTION_TIMEOUT_SECS`          | `60`                       |
    /// | `DETECTOR_URL`                    | `http://localhost:9001`    |
    /// | `DETECTOR_API_KEY`                | (empty)                    |
    /// | `DETECTION_CONFIDENCE_THRESHOLD`  | `0.5`                      |
    /// | `OCR_SERVICE_URL`                 | `http://localhost:9002`    |
    /// | `OCR_CONFIDENCE_THRESHOLD`        | `0.3`                      |
    /// | `CROP_PADDING_PX`                 | `5`                        |
    /// | `DETECTION_MAX_DIMENSION`         | `1024`                     |
    /// | `IMAGE_TIMEOUT_SECS`              | `30`                       |
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set".to_string())?;

        Ok(Self {
            database_url,
            datasets_dir: std::env::var("DATASETS_DIR")
                .unwrap_or_else(|_| "./test_data_OCR".into())
                .into(),
            unit_timeout: seconds("UNIT_TIMEOUT_SECS", 120)?,
            detection_timeout: seconds("DETECTION_TIMEOUT_SECS", 60)?,
            detector_url: std::env::var("DETECTOR_URL")
                .unwrap_or_else(|_| "http://localhost:9001".into()),
            detector_api_key: std::env::var("DETECTOR_API_KEY").unwrap_or_default(),
            detection_confidence_threshold: parsed("DETECTION_CONFIDENCE_THRESHOLD", 0.5)?,
            ocr_service_url: std::env::var("OCR_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:9002".into()),
            ocr_confidence_threshold: parsed("OCR_CONFIDENCE_THRESHOLD", 0.3)?,
            crop_padding_px: parsed("CROP_PADDING_PX", 5)?,
            detection_max_dimension: parsed("DETECTION_MAX_DIMENSION", 1024)?,
            image_timeout: seconds("IMAGE_TIMEOUT_SECS", 30)?,
        })
    }
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{name} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

fn seconds(name: &str, default: u64) -> Result<Option<Duration>, String> {
    let secs: u64 = parsed(name, default)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

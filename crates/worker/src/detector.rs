//! Hosted object-detection client.
//!
//! Uploads each image to a detection endpoint (Roboflow-style JSON
//! predictions), scales the returned boxes back to the original resolution
//! and crops one padded region per detected class.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageFormat};
use labelbench_core::timeout::TimeoutGuard;
use serde::Deserialize;

use crate::pipeline::{Detection, DetectionOutput, Detector, PipelineError, RegionCrop};

/// Attempts per image when the endpoint is rate limiting or unavailable.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay between attempts; multiplied by the attempt number.
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub confidence_threshold: f64,
    pub padding_px: u32,
    /// Longest side sent to the endpoint; larger images are downscaled.
    pub max_dimension: u32,
    /// Budget for each decode or crop step on the blocking pool.
    pub image_timeout: Option<Duration>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            padding_px: 5,
            max_dimension: 1024,
            image_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    class: String,
    confidence: f64,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    settings: DetectorSettings,
}

/// Decoded image plus the JPEG actually uploaded.
struct PreparedImage {
    original: DynamicImage,
    upload: Vec<u8>,
    scale: f64,
}

impl HttpDetector {
    pub fn new(endpoint: String, api_key: String, settings: DetectorSettings) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, api_key, settings)
    }

    pub fn with_client(
        client: reqwest::Client,
        endpoint: String,
        api_key: String,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            settings,
        }
    }

    async fn predict(&self, upload: &[u8]) -> Result<Vec<Prediction>, PipelineError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.predict_once(upload).await {
                Ok(predictions) => return Ok(predictions),
                Err(RequestFailure::Retryable(message)) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(attempt, error = %message, "Detection request failed, retrying");
                    tokio::time::sleep(RETRY_DELAY * attempt).await;
                }
                Err(RequestFailure::Retryable(message) | RequestFailure::Fatal(message)) => {
                    return Err(PipelineError::Detection(message));
                }
            }
        }
    }

    async fn predict_once(&self, upload: &[u8]) -> Result<Vec<Prediction>, RequestFailure> {
        let part = reqwest::multipart::Part::bytes(upload.to_vec())
            .file_name("image.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| RequestFailure::Fatal(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let confidence = (self.settings.confidence_threshold * 100.0).round() as u32;

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("api_key", self.api_key.as_str())])
            .query(&[("confidence", confidence)])
            .multipart(form)
            .send()
            .await
            .map_err(RequestFailure::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let message = format!("detector returned {status}: {body}");
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                RequestFailure::Retryable(message)
            } else {
                RequestFailure::Fatal(message)
            });
        }

        let parsed: PredictResponse = response
            .json()
            .await
            .map_err(|e| RequestFailure::Fatal(format!("invalid detector response: {e}")))?;
        Ok(parsed.predictions)
    }
}

enum RequestFailure {
    Retryable(String),
    Fatal(String),
}

impl RequestFailure {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            RequestFailure::Retryable(err.to_string())
        } else {
            RequestFailure::Fatal(err.to_string())
        }
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect_and_crop(&self, image_path: &Path) -> Result<DetectionOutput, PipelineError> {
        let path = image_path.to_path_buf();
        let max_dimension = self.settings.max_dimension;
        let prepared = TimeoutGuard::start_with(
            format!("decoding {}", image_path.display()),
            self.settings.image_timeout,
        )
        .run_blocking(move || prepare_image(&path, max_dimension))
        .await??;

        let predictions = self.predict(&prepared.upload).await?;
        let detections = scale_predictions(
            predictions,
            prepared.scale,
            self.settings.confidence_threshold,
        );

        let padding = self.settings.padding_px;
        let original = prepared.original;
        let for_crops = detections.clone();
        let crops = TimeoutGuard::start_with(
            format!("cropping {}", image_path.display()),
            self.settings.image_timeout,
        )
        .run_blocking(move || crop_detections(&original, &for_crops, padding))
        .await?;

        tracing::debug!(
            image = %image_path.display(),
            detections = detections.len(),
            crops = crops.len(),
            "Detection complete",
        );
        Ok(DetectionOutput { detections, crops })
    }
}

fn image_error(path: &Path, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Image {
        path: PathBuf::from(path),
        message: err.to_string(),
    }
}

fn prepare_image(path: &Path, max_dimension: u32) -> Result<PreparedImage, PipelineError> {
    let original = image::open(path).map_err(|e| image_error(path, e))?;
    let (width, height) = original.dimensions();
    let scale = downscale_factor(width, height, max_dimension);

    let to_upload = if scale < 1.0 {
        let new_width = ((f64::from(width) * scale) as u32).max(1);
        let new_height = ((f64::from(height) * scale) as u32).max(1);
        original.resize_exact(new_width, new_height, image::imageops::FilterType::Triangle)
    } else {
        original.clone()
    };

    let mut upload = Vec::new();
    DynamicImage::ImageRgb8(to_upload.to_rgb8())
        .write_to(&mut Cursor::new(&mut upload), ImageFormat::Jpeg)
        .map_err(|e| image_error(path, e))?;

    Ok(PreparedImage {
        original,
        upload,
        scale,
    })
}

/// Factor applied to fit the longest side within `max_dimension`; `1.0`
/// when the image already fits.
pub fn downscale_factor(width: u32, height: u32, max_dimension: u32) -> f64 {
    let longest = width.max(height);
    if max_dimension == 0 || longest <= max_dimension {
        1.0
    } else {
        f64::from(max_dimension) / f64::from(longest)
    }
}

fn scale_predictions(predictions: Vec<Prediction>, scale: f64, threshold: f64) -> Vec<Detection> {
    predictions
        .into_iter()
        .filter(|p| p.confidence >= threshold)
        .map(|p| Detection {
            class_name: p.class,
            confidence: p.confidence,
            x: (p.x / scale) as i64,
            y: (p.y / scale) as i64,
            width: (p.width / scale) as i64,
            height: (p.height / scale) as i64,
        })
        .collect()
}

/// Crop one padded region per class. When a class is detected more than
/// once, the first detection wins.
pub fn crop_detections(
    image: &DynamicImage,
    detections: &[Detection],
    padding: u32,
) -> Vec<RegionCrop> {
    let (width, height) = image.dimensions();
    let pad = i64::from(padding);
    let mut crops: Vec<RegionCrop> = Vec::new();

    for detection in detections {
        if crops.iter().any(|c| c.class_name == detection.class_name) {
            continue;
        }
        let (x_min, y_min, x_max, y_max) = detection.bbox();
        let x0 = (x_min - pad).clamp(0, i64::from(width));
        let y0 = (y_min - pad).clamp(0, i64::from(height));
        let x1 = (x_max + pad).clamp(0, i64::from(width));
        let y1 = (y_max + pad).clamp(0, i64::from(height));
        if x1 <= x0 || y1 <= y0 {
            continue;
        }

        crops.push(RegionCrop {
            class_name: detection.class_name.clone(),
            image: image.crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32),
        });
    }
    crops
}

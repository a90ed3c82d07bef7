//! Collaborator seams for the per-unit pipeline.
//!
//! A unit is one image: [`Detector::detect_and_crop`] finds the labelled
//! regions, then a [`Recognizer`] reads the text of each crop. Both report
//! failures as [`PipelineError`] values; the runner turns any of them into
//! a failed unit instead of a failed job.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::DynamicImage;
use labelbench_core::engine::OcrEngine;
use labelbench_core::timeout::TimeoutError;
use serde::{Deserialize, Serialize};

/// One detected region in original-image pixel coordinates.
///
/// `x`/`y` are the centre of the box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Detection {
    /// `(x_min, y_min, x_max, y_max)`.
    pub fn bbox(&self) -> (i64, i64, i64, i64) {
        (
            self.x - self.width / 2,
            self.y - self.height / 2,
            self.x + self.width / 2,
            self.y + self.height / 2,
        )
    }
}

/// A cropped region ready for recognition.
#[derive(Debug, Clone)]
pub struct RegionCrop {
    pub class_name: String,
    pub image: DynamicImage,
}

/// Everything detection produced for one image.
#[derive(Debug, Clone, Default)]
pub struct DetectionOutput {
    pub detections: Vec<Detection>,
    /// At most one crop per class, in the order first detected.
    pub crops: Vec<RegionCrop>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Recognition failed for {class_name}: {message}")]
    Recognition { class_name: String, message: String },

    #[error("Could not load image {}: {message}", path.display())]
    Image { path: PathBuf, message: String },

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect_and_crop(&self, image_path: &Path) -> Result<DetectionOutput, PipelineError>;
}

/// Reads the text in one crop. Resolved once per engine when the runner is
/// built.
#[async_trait]
pub trait Recognizer: Send + Sync {
    fn engine(&self) -> OcrEngine;

    /// `variant` is the job's preprocessing label, applied before reading.
    async fn recognize(&self, crop: &RegionCrop, variant: &str) -> Result<String, PipelineError>;
}

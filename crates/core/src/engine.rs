//! The fixed set of recognition engines and preprocessing variants.
//!
//! Engines are resolved from their wire identifier exactly once, at the
//! request boundary or when a worker is constructed. Everything downstream
//! handles the [`OcrEngine`] enum, never a raw string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Recognition engines a job can be evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngine {
    EasyOcr,
    PaddleOcr,
}

impl OcrEngine {
    pub const ALL: [OcrEngine; 2] = [OcrEngine::EasyOcr, OcrEngine::PaddleOcr];

    /// Stable identifier stored in the job table and used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            OcrEngine::EasyOcr => "easyocr",
            OcrEngine::PaddleOcr => "paddleocr",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            OcrEngine::EasyOcr => "EasyOCR",
            OcrEngine::PaddleOcr => "PaddleOCR",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            OcrEngine::EasyOcr => "Lightweight OCR with good accuracy for printed text",
            OcrEngine::PaddleOcr => "High-performance OCR with angle classification support",
        }
    }
}

impl fmt::Display for OcrEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrEngine {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OcrEngine::ALL
            .into_iter()
            .find(|engine| engine.as_str() == s)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Invalid engine: {s}. Must be one of: {}",
                    OcrEngine::ALL.map(OcrEngine::as_str).join(", ")
                ))
            })
    }
}

/// A preprocessing variant applied to each crop before recognition.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PreprocessingOption {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
}

/// Variant label used when a submission does not name one.
pub const DEFAULT_VARIANT: &str = "none";

pub const PREPROCESSING_OPTIONS: &[PreprocessingOption] = &[
    PreprocessingOption {
        id: "none",
        name: "None (Baseline)",
        description: "Original image without preprocessing",
        category: "baseline",
    },
    PreprocessingOption {
        id: "rescale",
        name: "Rescale to 300 DPI",
        description: "Upscale image for better OCR accuracy",
        category: "geometric",
    },
    PreprocessingOption {
        id: "binarize_otsu",
        name: "Otsu Binarization",
        description: "Global thresholding for text extraction",
        category: "binarization",
    },
    PreprocessingOption {
        id: "binarize_adaptive",
        name: "Adaptive Threshold",
        description: "Local adaptive thresholding for uneven lighting",
        category: "binarization",
    },
    PreprocessingOption {
        id: "binarize_sauvola",
        name: "Sauvola Binarization",
        description: "Document-optimized local thresholding",
        category: "binarization",
    },
    PreprocessingOption {
        id: "denoise_gaussian",
        name: "Gaussian Blur",
        description: "Smooth noise with Gaussian filter",
        category: "noise",
    },
    PreprocessingOption {
        id: "denoise_median",
        name: "Median Filter",
        description: "Remove salt-and-pepper noise",
        category: "noise",
    },
    PreprocessingOption {
        id: "dilation",
        name: "Dilation",
        description: "Expand characters for thin text",
        category: "morphological",
    },
    PreprocessingOption {
        id: "erosion",
        name: "Erosion",
        description: "Shrink characters for heavy ink bleed",
        category: "morphological",
    },
    PreprocessingOption {
        id: "deskew",
        name: "Deskew",
        description: "Rotate to straighten text lines",
        category: "geometric",
    },
    PreprocessingOption {
        id: "add_border",
        name: "Add Border",
        description: "Add 10px white margin around text",
        category: "geometric",
    },
    PreprocessingOption {
        id: "invert",
        name: "Invert Colors",
        description: "Ensure dark text on light background",
        category: "baseline",
    },
    PreprocessingOption {
        id: "sr_fast_2x",
        name: "Super-Resolution 2x (fast)",
        description: "Learned 2x upscale, small model",
        category: "super_resolution",
    },
    PreprocessingOption {
        id: "sr_quality_2x",
        name: "Super-Resolution 2x (quality)",
        description: "Learned 2x upscale, large model",
        category: "super_resolution",
    },
    PreprocessingOption {
        id: "sr_gans_4x",
        name: "Super-Resolution 4x (GAN)",
        description: "Learned 4x upscale, slowest",
        category: "super_resolution",
    },
];

/// Check that `variant` names a known preprocessing option.
pub fn validate_variant(variant: &str) -> Result<(), CoreError> {
    if PREPROCESSING_OPTIONS.iter().any(|opt| opt.id == variant) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unknown preprocessing variant: {variant}"
        )))
    }
}

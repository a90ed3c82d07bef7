//! OCR sidecar client.
//!
//! Each engine is served by the sidecar at `{base_url}/ocr/{engine}`. The
//! crop is uploaded as PNG together with the preprocessing variant; the
//! sidecar answers with text fragments and confidences.

use std::io::Cursor;

use async_trait::async_trait;
use image::ImageFormat;
use labelbench_core::engine::OcrEngine;
use serde::Deserialize;

use crate::pipeline::{PipelineError, Recognizer, RegionCrop};

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    fragments: Vec<TextFragment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextFragment {
    pub text: String,
    pub confidence: f64,
}

pub struct HttpRecognizer {
    client: reqwest::Client,
    base_url: String,
    engine: OcrEngine,
    confidence_threshold: f64,
}

impl HttpRecognizer {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        engine: OcrEngine,
        confidence_threshold: f64,
    ) -> Self {
        Self {
            client,
            base_url,
            engine,
            confidence_threshold,
        }
    }

    fn failure(&self, crop: &RegionCrop, message: impl Into<String>) -> PipelineError {
        PipelineError::Recognition {
            class_name: crop.class_name.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    fn engine(&self) -> OcrEngine {
        self.engine
    }

    async fn recognize(&self, crop: &RegionCrop, variant: &str) -> Result<String, PipelineError> {
        let mut png = Vec::new();
        crop.image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| self.failure(crop, e.to_string()))?;

        let part = reqwest::multipart::Part::bytes(png)
            .file_name("crop.png")
            .mime_str("image/png")
            .map_err(|e| self.failure(crop, e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("preprocessing", variant.to_string());

        let response = self
            .client
            .post(format!("{}/ocr/{}", self.base_url, self.engine))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.failure(crop, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(self.failure(crop, format!("OCR service returned {status}: {body}")));
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| self.failure(crop, format!("invalid OCR response: {e}")))?;
        Ok(join_fragments(&parsed.fragments, self.confidence_threshold))
    }
}

/// Space-join the fragments at or above `threshold`, in reading order.
pub fn join_fragments(fragments: &[TextFragment], threshold: f64) -> String {
    fragments
        .iter()
        .filter(|f| f.confidence >= threshold)
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

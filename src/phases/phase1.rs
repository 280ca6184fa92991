// Phase 1: Region extraction
//
// OCR never fails the pipeline: an engine error becomes an empty result
// tagged with the reason.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use crate::core::languages::Language;
use crate::core::types::{ExtractedRegions, FallbackReason, Outcome, TextToken};
use crate::services::ocr::{OcrEngine, RecognizedPage};
use crate::utils::{Metrics, Stage};

pub struct Phase1Pipeline {
    ocr: Arc<dyn OcrEngine>,
    confidence_threshold: f32,
    metrics: Option<Metrics>,
}

/// Keep the full text, but only tokens strictly above the threshold for
/// mask and anchor computation
pub fn filter_confident(page: RecognizedPage, confidence_threshold: f32) -> ExtractedRegions {
    let confident_tokens: Vec<TextToken> = page
        .tokens
        .into_iter()
        .filter(|t| t.confidence > confidence_threshold && t.width > 0 && t.height > 0)
        .collect();
    ExtractedRegions {
        text: page.text,
        confident_tokens,
    }
}

impl Phase1Pipeline {
    pub fn new(ocr: Arc<dyn OcrEngine>, confidence_threshold: f32) -> Self {
        Self {
            ocr,
            confidence_threshold,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[instrument(skip(self, image_path), fields(path = %image_path.display(), lang = %language))]
    pub async fn execute(&self, image_path: &Path, language: Language) -> Outcome<ExtractedRegions> {
        let start = Instant::now();
        let threshold = self.confidence_threshold;

        let outcome = Outcome::recover(
            self.ocr
                .recognize(image_path, language)
                .await
                .map(|page| filter_confident(page, threshold)),
            ExtractedRegions::empty,
            |e| FallbackReason::OcrFailed(e.to_string()),
        );

        match outcome.reason() {
            Some(reason) => warn!("Region extraction fell back to empty text: {}", reason),
            None => debug!(
                "Extracted {} chars, {} confident boxes",
                outcome.value().text.len(),
                outcome.value().confident_tokens.len()
            ),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_stage(Stage::Extraction, start.elapsed());
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{OcrError, OcrResult};
    use async_trait::async_trait;

    fn token(text: &str, confidence: f32) -> TextToken {
        TextToken {
            text: text.to_string(),
            left: 10,
            top: 20,
            width: 30,
            height: 12,
            confidence,
        }
    }

    struct FixedOcr(RecognizedPage);

    #[async_trait]
    impl OcrEngine for FixedOcr {
        async fn recognize(&self, _: &Path, _: Language) -> OcrResult<RecognizedPage> {
            Ok(self.0.clone())
        }
    }

    struct BrokenOcr;

    #[async_trait]
    impl OcrEngine for BrokenOcr {
        async fn recognize(&self, _: &Path, _: Language) -> OcrResult<RecognizedPage> {
            Err(OcrError::EngineFailed("cannot read image".to_string()))
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let page = RecognizedPage {
            text: "HELLO smudge edge".to_string(),
            tokens: vec![token("HELLO", 93.0), token("smudge", 5.0), token("edge", 20.0)],
        };
        let regions = filter_confident(page, 20.0);
        assert_eq!(regions.text, "HELLO smudge edge");
        assert_eq!(regions.confident_tokens.len(), 1);
        assert_eq!(regions.confident_tokens[0].text, "HELLO");
    }

    #[tokio::test]
    async fn test_execute_success() {
        let page = RecognizedPage {
            text: "HELLO".to_string(),
            tokens: vec![token("HELLO", 90.0)],
        };
        let phase = Phase1Pipeline::new(Arc::new(FixedOcr(page)), 20.0);
        let out = phase.execute(Path::new("a.png"), Language::English).await;
        assert!(!out.is_fallback());
        assert_eq!(out.value().anchor(), Some((10, 20)));
    }

    #[tokio::test]
    async fn test_engine_failure_is_empty_text() {
        let phase = Phase1Pipeline::new(Arc::new(BrokenOcr), 20.0);
        let out = phase.execute(Path::new("a.png"), Language::English).await;
        assert!(matches!(out.reason(), Some(FallbackReason::OcrFailed(_))));
        assert_eq!(out.into_value(), ExtractedRegions::empty());
    }
}

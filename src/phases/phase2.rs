// Phase 2: Translation of the extracted text for one target language

use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

use crate::core::languages::Language;
use crate::core::types::Outcome;
use crate::services::translation::TranslationAdapter;
use crate::utils::{Metrics, Stage};

pub struct Phase2Pipeline {
    adapter: Arc<TranslationAdapter>,
    metrics: Option<Metrics>,
}

impl Phase2Pipeline {
    pub fn new(adapter: Arc<TranslationAdapter>) -> Self {
        Self {
            adapter,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Translate as extracted; a fallback returns the source unchanged
    #[instrument(skip(self, text), fields(from = %source, to = %target))]
    pub async fn execute(&self, text: &str, source: Language, target: Language) -> Outcome<String> {
        let start = Instant::now();
        let outcome = self.adapter.translate(text, source, target).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_stage(Stage::Translation, start.elapsed());
        }
        outcome
    }

    /// Regeneration flow: pipe separators become the target script's clause
    /// mark first, so a failed translation still reads right when drawn.
    pub async fn execute_localized(&self, text: &str, source: Language, target: Language) -> Outcome<String> {
        let prepared = target.localize_separators(text);
        self.execute(&prepared, source, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FallbackReason;

    #[tokio::test]
    async fn test_fallback_keeps_localized_source() {
        let phase = Phase2Pipeline::new(Arc::new(TranslationAdapter::disabled()));
        let out = phase
            .execute_localized("Live | Laugh | Love", Language::English, Language::Hindi)
            .await;
        assert_eq!(out.reason(), Some(&FallbackReason::TranslationUnavailable));
        assert_eq!(out.value(), "Live \u{0964} Laugh \u{0964} Love");
    }

    #[tokio::test]
    async fn test_plain_fallback_is_the_source_verbatim() {
        let phase = Phase2Pipeline::new(Arc::new(TranslationAdapter::disabled()));
        let out = phase
            .execute("Live | Laugh | Love", Language::English, Language::Arabic)
            .await;
        assert_eq!(out.reason(), Some(&FallbackReason::TranslationUnavailable));
        assert_eq!(out.value(), "Live | Laugh | Love");
    }

    #[tokio::test]
    async fn test_empty_text_stays_empty() {
        let phase = Phase2Pipeline::new(Arc::new(TranslationAdapter::disabled()));
        let out = phase.execute("", Language::English, Language::French).await;
        assert_eq!(out, Outcome::Success(String::new()));
    }
}

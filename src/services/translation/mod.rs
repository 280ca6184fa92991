// Translation Adapter and its remote backends
//
// Backends speak one wire contract each and return typed errors. The adapter
// is the only thing the pipeline calls: it never fails, it returns the source
// text tagged with the reason whenever the backend could not deliver.

pub mod chat;
pub mod dedicated;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::core::config::{Config, TranslationBackendKind};
use crate::core::errors::{TranslationError, TranslationResult};
use crate::core::languages::Language;
use crate::core::types::{FallbackReason, Outcome};
use crate::middleware::circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
use crate::utils::Metrics;

pub use chat::ChatTranslator;
pub use dedicated::DedicatedTranslator;

#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source: Language,
        target: Language,
    ) -> TranslationResult<String>;
}

/// Shared reqwest client settings for the remote capabilities
pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create HTTP client")
}

pub struct TranslationAdapter {
    backend: Option<Arc<dyn TranslationBackend>>,
    breaker: CircuitBreaker,
    metrics: Option<Metrics>,
}

impl TranslationAdapter {
    pub fn new(backend: Option<Arc<dyn TranslationBackend>>, breaker: CircuitBreaker) -> Self {
        Self {
            backend,
            breaker,
            metrics: None,
        }
    }

    /// Adapter with no backend: every translation is the identity
    pub fn disabled() -> Self {
        Self::new(
            None,
            CircuitBreaker::new("translation", CircuitBreakerConfig::default()),
        )
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn from_config(config: &Config, breaker: CircuitBreaker) -> Result<Self> {
        let t = &config.translation;
        let backend: Option<Arc<dyn TranslationBackend>> = match t.backend {
            TranslationBackendKind::Dedicated => Some(Arc::new(DedicatedTranslator::new(
                t.endpoint.clone(),
                t.api_key.clone(),
                t.timeout,
            )?)),
            TranslationBackendKind::Chat => Some(Arc::new(ChatTranslator::new(
                t.endpoint.clone(),
                t.api_key.clone(),
                t.model.clone(),
                t.timeout,
            )?)),
            TranslationBackendKind::Disabled => None,
        };
        Ok(Self::new(backend, breaker))
    }

    /// Translate `text`, falling back to `text` itself on any failure.
    #[instrument(skip_all, fields(from = %source, to = %target, chars = text.len()))]
    pub async fn translate(&self, text: &str, source: Language, target: Language) -> Outcome<String> {
        if text.trim().is_empty() || source == target {
            return Outcome::Success(text.to_string());
        }

        let Some(backend) = &self.backend else {
            return Outcome::fallback(text.to_string(), FallbackReason::TranslationUnavailable);
        };

        let start = Instant::now();
        let result = self
            .breaker
            .call(|| backend.translate(text, source, target))
            .await
            .map_err(|e| match e {
                BreakerError::Open => TranslationError::CircuitOpen,
                BreakerError::Inner(inner) => inner,
            });

        if let Some(metrics) = &self.metrics {
            if !matches!(result, Err(TranslationError::CircuitOpen)) {
                metrics.record_remote_call("translation", result.is_ok(), start.elapsed());
            }
        }

        let outcome = Outcome::recover(
            result,
            || text.to_string(),
            |e| FallbackReason::TranslationFailed(e.to_string()),
        );
        match outcome.reason() {
            Some(reason) => warn!("Translation to {} fell back to source text: {}", target, reason),
            None => debug!("Translated {} chars to {}", text.len(), target),
        }
        outcome
    }
}

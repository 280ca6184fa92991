// Prompt-to-image capability (regeneration flow)

use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::core::errors::{CapabilityError, CapabilityResult};
use crate::middleware::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::services::translation::build_http_client;
use crate::utils::{load_image_from_memory_async, Metrics};

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> CapabilityResult<DynamicImage>;
}

/// `GET {base_url}/prompt/{url-encoded prompt}` returning the image bytes
pub struct PromptImageClient {
    base_url: String,
    http_client: reqwest::Client,
    breaker: CircuitBreaker,
    metrics: Option<Metrics>,
}

impl PromptImageClient {
    pub fn new(base_url: String, timeout: Duration, breaker: CircuitBreaker) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: build_http_client(timeout)?,
            breaker,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn prompt_url(&self, prompt: &str) -> String {
        format!("{}/prompt/{}", self.base_url, urlencoding::encode(prompt.trim()))
    }

    async fn fetch(&self, url: &str) -> CapabilityResult<DynamicImage> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::BadStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        let bytes = response.bytes().await?;
        load_image_from_memory_async(bytes.to_vec())
            .await
            .map_err(|e| CapabilityError::InvalidImage(e.to_string()))
    }
}

#[async_trait]
impl ImageGenerator for PromptImageClient {
    async fn generate(&self, prompt: &str) -> CapabilityResult<DynamicImage> {
        let url = self.prompt_url(prompt);
        debug!("Requesting generated background: {}", url);

        let start = Instant::now();
        let result = self.breaker.call(|| self.fetch(&url)).await;
        if let Some(metrics) = &self.metrics {
            if !matches!(result, Err(BreakerError::Open)) {
                metrics.record_remote_call("generation", result.is_ok(), start.elapsed());
            }
        }

        let image = result.map_err(|e| match e {
            BreakerError::Open => CapabilityError::CircuitOpen("generation"),
            BreakerError::Inner(inner) => inner,
        })?;
        info!(
            "Generated {}x{} background in {:.2}s",
            image.width(),
            image.height(),
            start.elapsed().as_secs_f64()
        );
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::circuit_breaker::CircuitBreakerConfig;

    #[test]
    fn test_prompt_url_is_encoded() {
        let client = PromptImageClient::new(
            "https://image.example.com/".to_string(),
            Duration::from_secs(5),
            CircuitBreaker::new("generation", CircuitBreakerConfig::default()),
        )
        .unwrap();
        assert_eq!(
            client.prompt_url("a plain solid background of colour #FFFFFF"),
            "https://image.example.com/prompt/a%20plain%20solid%20background%20of%20colour%20%23FFFFFF"
        );
    }
}

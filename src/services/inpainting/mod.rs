// Inpainting capability boundary
//
// `Inpainter` takes the source image plus a single-channel mask of the same
// size and returns the image with the masked area filled in.

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use image::{DynamicImage, GrayImage};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::core::errors::{InpaintingError, InpaintingResult};
use crate::middleware::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::services::translation::build_http_client;
use crate::utils::{encode_mask_png, encode_png, Metrics};

#[async_trait]
pub trait Inpainter: Send + Sync {
    async fn inpaint(&self, image: &DynamicImage, mask: &GrayImage) -> InpaintingResult<DynamicImage>;
}

/// Remote inpainting model behind an HTTP endpoint.
///
/// Request body is `{"image": <base64 png>, "mask": <base64 png>}`, the
/// response body is the encoded result image.
pub struct HttpInpainter {
    endpoint: String,
    http_client: reqwest::Client,
    breaker: CircuitBreaker,
    metrics: Option<Metrics>,
}

#[derive(Debug, Serialize)]
struct InpaintRequest {
    image: String,
    mask: String,
}

impl HttpInpainter {
    pub fn new(endpoint: String, timeout: Duration, breaker: CircuitBreaker) -> Result<Self> {
        Ok(Self {
            endpoint,
            http_client: build_http_client(timeout)?,
            breaker,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn send(&self, request: &InpaintRequest) -> InpaintingResult<DynamicImage> {
        let response = self.http_client.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(InpaintingError::BadStatus(status.as_u16()));
        }
        let bytes = response.bytes().await?;
        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| InpaintingError::PayloadFailed(e.to_string()))??;
        Ok(decoded)
    }
}

#[async_trait]
impl Inpainter for HttpInpainter {
    async fn inpaint(&self, image: &DynamicImage, mask: &GrayImage) -> InpaintingResult<DynamicImage> {
        let encode_err = |e: anyhow::Error| InpaintingError::PayloadFailed(e.to_string());
        let request = InpaintRequest {
            image: general_purpose::STANDARD.encode(encode_png(image).map_err(encode_err)?),
            mask: general_purpose::STANDARD.encode(encode_mask_png(mask).map_err(encode_err)?),
        };

        let start = Instant::now();
        let result = self.breaker.call(|| self.send(&request)).await;
        if let Some(metrics) = &self.metrics {
            if !matches!(result, Err(BreakerError::Open)) {
                metrics.record_remote_call("inpainting", result.is_ok(), start.elapsed());
            }
        }

        let result = result.map_err(|e| match e {
            BreakerError::Open => InpaintingError::CircuitOpen,
            BreakerError::Inner(inner) => inner,
        })?;

        debug!(
            "Inpainting returned {}x{} image",
            result.width(),
            result.height()
        );
        Ok(result)
    }
}

// Background description for the regeneration flow
//
// Near-solid backgrounds are described locally from their dominant colour;
// everything else goes to a vision chat model.

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use image::{DynamicImage, GenericImageView, Rgb};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::core::errors::{CapabilityError, CapabilityResult};
use crate::core::types::{FallbackReason, Outcome};
use crate::middleware::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::services::translation::build_http_client;
use crate::utils::{encode_png, Metrics};

/// Luminance variance below which a background may count as solid
pub const LUMINANCE_VARIANCE_THRESHOLD: f64 = 100.0;
/// Share of samples the dominant colour bucket must exceed
pub const DOMINANT_SHARE_THRESHOLD: f64 = 0.9;
/// Used when captioning is unavailable or fails
pub const DEFAULT_BACKGROUND_DESCRIPTION: &str = "A beautiful landscape";

const MAX_SAMPLES: u32 = 10_000;
const CAPTION_PROMPT: &str =
    "Describe the background of this image in one short sentence suitable as an image generation prompt. Do not mention any text.";

#[async_trait]
pub trait Captioner: Send + Sync {
    async fn describe(&self, image: &DynamicImage) -> CapabilityResult<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundAnalysis {
    pub dominant_color: Rgb<u8>,
    pub dominant_share: f64,
    pub luminance_variance: f64,
}

impl BackgroundAnalysis {
    pub fn is_near_solid(&self) -> bool {
        self.luminance_variance < LUMINANCE_VARIANCE_THRESHOLD
            && self.dominant_share > DOMINANT_SHARE_THRESHOLD
    }

    pub fn solid_description(&self) -> String {
        let Rgb([r, g, b]) = self.dominant_color;
        format!("a plain solid background of colour #{:02X}{:02X}{:02X}", r, g, b)
    }
}

/// Sample the image on a regular grid and measure how uniform it is.
///
/// Colours are bucketed at 3 bits per channel; the reported dominant colour
/// is the mean of the samples in the largest bucket.
pub fn analyze_background(image: &DynamicImage) -> BackgroundAnalysis {
    let (width, height) = image.dimensions();
    let total = width as u64 * height as u64;
    if total == 0 {
        return BackgroundAnalysis {
            dominant_color: Rgb([0, 0, 0]),
            dominant_share: 0.0,
            luminance_variance: 0.0,
        };
    }

    let stride = ((total as f64 / MAX_SAMPLES as f64).sqrt().ceil() as u32).max(1);
    let rgb = image.to_rgb8();

    let mut buckets: HashMap<(u8, u8, u8), (u64, [u64; 3])> = HashMap::new();
    let mut lum_sum = 0.0f64;
    let mut lum_sq_sum = 0.0f64;
    let mut samples = 0u64;

    for y in (0..height).step_by(stride as usize) {
        for x in (0..width).step_by(stride as usize) {
            let Rgb([r, g, b]) = *rgb.get_pixel(x, y);
            let lum = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
            lum_sum += lum;
            lum_sq_sum += lum * lum;
            samples += 1;

            let entry = buckets.entry((r >> 5, g >> 5, b >> 5)).or_insert((0, [0; 3]));
            entry.0 += 1;
            entry.1[0] += r as u64;
            entry.1[1] += g as u64;
            entry.1[2] += b as u64;
        }
    }

    let mean = lum_sum / samples as f64;
    let luminance_variance = (lum_sq_sum / samples as f64 - mean * mean).max(0.0);

    let (count, sums) = buckets
        .values()
        .max_by_key(|(count, _)| *count)
        .copied()
        .unwrap_or((0, [0; 3]));
    let dominant_color = if count > 0 {
        Rgb([
            (sums[0] / count) as u8,
            (sums[1] / count) as u8,
            (sums[2] / count) as u8,
        ])
    } else {
        Rgb([0, 0, 0])
    };

    BackgroundAnalysis {
        dominant_color,
        dominant_share: count as f64 / samples as f64,
        luminance_variance,
    }
}

/// Describe the image background: locally for near-solid images, otherwise
/// through the captioner, falling back to a generic landscape prompt.
pub async fn describe_background(
    image: &DynamicImage,
    captioner: Option<&dyn Captioner>,
) -> Outcome<String> {
    let analysis = analyze_background(image);
    if analysis.is_near_solid() {
        debug!(
            "Near-solid background (variance {:.1}, share {:.2})",
            analysis.luminance_variance, analysis.dominant_share
        );
        return Outcome::Success(analysis.solid_description());
    }

    let Some(captioner) = captioner else {
        return Outcome::fallback(
            DEFAULT_BACKGROUND_DESCRIPTION.to_string(),
            FallbackReason::CaptioningUnavailable,
        );
    };

    let outcome = Outcome::recover(
        captioner
            .describe(image)
            .await
            .and_then(|d| {
                let d = d.trim().to_string();
                if d.is_empty() {
                    Err(CapabilityError::InvalidResponse("empty caption".to_string()))
                } else {
                    Ok(d)
                }
            }),
        || DEFAULT_BACKGROUND_DESCRIPTION.to_string(),
        |e| FallbackReason::CaptioningFailed(e.to_string()),
    );
    if let Some(reason) = outcome.reason() {
        warn!("Background captioning fell back: {}", reason);
    }
    outcome
}

/// Vision chat-completion captioner
pub struct HttpCaptioner {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    http_client: reqwest::Client,
    breaker: CircuitBreaker,
    metrics: Option<Metrics>,
}

#[derive(Debug, Serialize)]
struct VisionRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct VisionResponse {
    #[serde(default)]
    choices: Vec<VisionChoice>,
}

#[derive(Debug, Deserialize)]
struct VisionChoice {
    message: VisionMessage,
}

#[derive(Debug, Deserialize)]
struct VisionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpCaptioner {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: String,
        breaker: CircuitBreaker,
    ) -> Result<Self> {
        Ok(Self {
            endpoint,
            api_key,
            model,
            http_client: build_http_client(Duration::from_secs(60))?,
            breaker,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn send(&self, request: &VisionRequest) -> CapabilityResult<String> {
        let mut builder = self.http_client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CapabilityError::BadStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: VisionResponse = serde_json::from_str(&body)
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CapabilityError::InvalidResponse("no caption in response".to_string()))
    }
}

#[async_trait]
impl Captioner for HttpCaptioner {
    async fn describe(&self, image: &DynamicImage) -> CapabilityResult<String> {
        let png = encode_png(image).map_err(|e| CapabilityError::InvalidImage(e.to_string()))?;
        let data_url = format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(png)
        );
        let request = VisionRequest {
            model: self.model.clone(),
            messages: vec![json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": CAPTION_PROMPT},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]
            })],
            temperature: 0.2,
        };

        let start = Instant::now();
        let result = self.breaker.call(|| self.send(&request)).await;
        if let Some(metrics) = &self.metrics {
            if !matches!(result, Err(BreakerError::Open)) {
                metrics.record_remote_call("captioning", result.is_ok(), start.elapsed());
            }
        }
        result.map_err(|e| match e {
            BreakerError::Open => CapabilityError::CircuitOpen("captioning"),
            BreakerError::Inner(inner) => inner,
        })
    }
}

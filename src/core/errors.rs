// Error types for the localization pipeline
//
// Using thiserror for ergonomic error definitions with:
// - Context preservation
// - Type-safe error matching
// - Source error chaining

use std::time::Duration;
use thiserror::Error;

use crate::core::languages::Language;

/// OCR capability errors
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Failed to launch OCR engine '{command}': {source}")]
    EngineUnavailable {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OCR engine exited with failure: {0}")]
    EngineFailed(String),

    #[error("OCR output could not be parsed: {0}")]
    MalformedOutput(String),
}

/// Translation capability errors
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("No translation backend configured")]
    Unavailable,

    #[error("Circuit breaker is open, translation backend is failing fast")]
    CircuitOpen,

    #[error("API request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Translation backend returned HTTP {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

/// Inpainting capability errors
#[derive(Debug, Error)]
pub enum InpaintingError {
    #[error("Circuit breaker is open, inpainting backend is failing fast")]
    CircuitOpen,

    #[error("Inpainting request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Inpainting backend returned HTTP {0}")]
    BadStatus(u16),

    #[error("Inpainting returned an undecodable image: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error("Inpainting payload could not be prepared: {0}")]
    PayloadFailed(String),

    #[error("Inpainted image is {actual_width}x{actual_height}, expected {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

/// Errors from the auxiliary remote capabilities (captioning, generation)
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Circuit breaker is open for {0}")]
    CircuitOpen(&'static str),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Backend returned HTTP {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Image could not be encoded or decoded: {0}")]
    InvalidImage(String),
}

/// Rendering and compositing errors
#[derive(Debug, Error)]
pub enum RenderingError {
    #[error("Image processing failed: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Failed to write output image {path}: {source}")]
    OutputFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Rendering task failed: {0}")]
    TaskFailed(String),
}

/// Post scheduling errors (caller contract violations, never retried)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("optimal_time must be HH:MM on a 24-hour clock, got '{0}'")]
    InvalidOptimalTime(String),
}

/// Admission control rejections
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Rate limit exceeded for '{identity}': {max_requests} requests per {window:?} (retry after {retry_after:?})")]
    RateLimited {
        identity: String,
        max_requests: u32,
        window: Duration,
        retry_after: Duration,
    },
}

/// Pipeline orchestration errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image {image_id} is not in the state store")]
    UnknownImage { image_id: String },

    #[error("Failed to load source image {path}: {reason}")]
    ImageLoadFailed { path: String, reason: String },

    #[error("Compositing failed for language {language}: {source}")]
    CompositingFailed {
        language: Language,
        #[source]
        source: RenderingError,
    },

    #[error("Quote is empty")]
    EmptyQuote,

    #[error("Image generation failed: {0}")]
    GenerationFailed(String),

    #[error("Pipeline is not initialized")]
    Uninitialized,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Confidence threshold must be in [0, 100], got {0}")]
    InvalidConfidenceThreshold(f32),

    #[error("Invalid translation config: {0}")]
    InvalidTranslationConfig(String),

    #[error("Invalid rendering config: {0}")]
    InvalidRenderingConfig(String),

    #[error("Invalid rate limit config: {0}")]
    InvalidRateLimitConfig(String),

    #[error("Concurrency limit must be > 0, got {0}")]
    InvalidConcurrency(usize),

    #[error("Environment variable {key} has an invalid value: {value}")]
    EnvVarError { key: String, value: String },
}

// Convenience type aliases for Results
pub type OcrResult<T> = Result<T, OcrError>;
pub type TranslationResult<T> = Result<T, TranslationError>;
pub type InpaintingResult<T> = Result<T, InpaintingError>;
pub type CapabilityResult<T> = Result<T, CapabilityError>;
pub type RenderingResult<T> = Result<T, RenderingError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Attach the language a per-unit error belongs to
pub trait ErrorContext<T> {
    fn with_language_context(self, language: Language) -> PipelineResult<T>;
}

impl<T> ErrorContext<T> for RenderingResult<T> {
    fn with_language_context(self, language: Language) -> PipelineResult<T> {
        self.map_err(|e| PipelineError::CompositingFailed {
            language,
            source: e,
        })
    }
}

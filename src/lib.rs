// Library exports for the image localization pipeline
//
// OCR -> text removal -> translation -> script-aware compositing, plus
// timezone-aware post scheduling and per-caller admission control

// Core modules
pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod phases;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{AdmissionError, ConfigError, PipelineError, RenderingError, SchedulingError, TranslationError},
    languages::{Language, Platform, TimeZone},
    types::{
        FallbackReason, FontStyle, ImageContent, Outcome, PostSchedule, ProcessImageRequest,
        ProcessImageResponse, QuoteImageRequest, QuoteImageResponse, RegenerateImageRequest,
        RegenerateImageResponse, SchedulePostRequest, SchedulePostResponse, TranslateImageRequest,
        TranslatedContent,
    },
};

pub use middleware::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, RateLimiter};

pub use orchestration::{ContentPipeline, ContentPipelineBuilder, StateStore};

pub use services::{OcrEngine, PostScheduler, TextRenderer, TranslationAdapter, TranslationBackend};

pub use utils::{load_image_async, Metrics};

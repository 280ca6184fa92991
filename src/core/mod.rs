pub mod config;
pub mod errors;
pub mod languages;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    AdmissionError, ConfigError, InpaintingError, OcrError, PipelineError, RenderingError,
    SchedulingError, TranslationError,
};
pub use languages::{Language, Platform, TimeZone};
pub use types::{
    FallbackReason, FontStyle, ImageContent, Outcome, PostSchedule, TranslatedContent,
};

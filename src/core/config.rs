use crate::core::errors::ConfigError;
use crate::core::types::{parse_hex_color, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_TEXT_POSITION};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// OCR configuration
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Tesseract executable
    pub command: String,
    /// Page segmentation mode passed as `--psm`
    pub page_segmentation_mode: u32,
    /// Tokens with confidence <= this value (0-100) are ignored for masks
    pub confidence_threshold: f32,
}

/// Which remote translation contract to speak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationBackendKind {
    /// `POST {url}` with `{text, source_language, target_language}`
    Dedicated,
    /// OpenAI-style chat completion
    Chat,
    Disabled,
}

impl FromStr for TranslationBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dedicated" | "translate" => Ok(Self::Dedicated),
            "chat" | "completion" => Ok(Self::Chat),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => Err(ConfigError::EnvVarError {
                key: "TRANSLATION_BACKEND".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Translation configuration
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub backend: TranslationBackendKind,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

/// Inpainting configuration (absent endpoint = capability unavailable)
#[derive(Debug, Clone)]
pub struct InpaintingConfig {
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

/// Image captioning configuration
#[derive(Debug, Clone)]
pub struct CaptioningConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
}

/// Prompt-to-image configuration
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: Option<String>,
    pub timeout: Duration,
}

/// Rendering configuration
#[derive(Debug, Clone)]
pub struct RenderingConfig {
    pub fonts_dir: PathBuf,
    pub load_system_fonts: bool,
    pub default_font_family: String,
    pub default_font_size: f32,
    pub default_font_color: String,
    /// Extra vertical gap between lines in anchored layout
    pub line_padding: i32,
    pub default_position: (i32, i32),
    /// Font size of the centred overlay in the regeneration flow
    pub centered_font_size: f32,
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_seconds: u64,
}

/// Circuit breaker configuration for remote capabilities
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: usize,
    pub open_seconds: u64,
}

/// Request concurrency configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrent_requests: usize,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub ocr: OcrConfig,
    pub translation: TranslationConfig,
    pub inpainting: InpaintingConfig,
    pub captioning: CaptioningConfig,
    pub generation: GenerationConfig,
    pub rendering: RenderingConfig,
    pub output: OutputConfig,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: BreakerConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build from an explicit variable list instead of the process environment
    pub fn from_vars(vars: &[(&str, &str)]) -> Result<Self, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = Self::load(|key| map.get(key).cloned())?;
        config.validate()?;
        Ok(config)
    }

    fn load(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parse_or = |key: &str, default: &str| -> String {
            var(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| -> Option<String> {
            var(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        // Parse log level
        let log_level = var("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let translation_backend: TranslationBackendKind = parse_or("TRANSLATION_BACKEND", "dedicated").parse()?;

        Ok(Self {
            server: ServerConfig {
                port: parse_num(&var, "SERVER_PORT", 8000)?,
                host: parse_or("SERVER_HOST", "0.0.0.0"),
                log_level,
            },
            ocr: OcrConfig {
                command: parse_or("TESSERACT_CMD", "tesseract"),
                page_segmentation_mode: parse_num(&var, "TESSERACT_PSM", 3)?,
                confidence_threshold: parse_num(&var, "OCR_CONFIDENCE_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD)?,
            },
            translation: TranslationConfig {
                backend: translation_backend,
                endpoint: parse_or(
                    "TRANSLATION_ENDPOINT",
                    match translation_backend {
                        TranslationBackendKind::Chat => "https://api.asi1.ai/v1/chat/completions",
                        _ => "https://api.asi1.ai/v1/translate",
                    },
                ),
                api_key: optional("TRANSLATION_API_KEY"),
                model: parse_or("TRANSLATION_MODEL", "asi1-mini"),
                timeout: Duration::from_secs(parse_num(&var, "TRANSLATION_TIMEOUT_SECONDS", 30)?),
            },
            inpainting: InpaintingConfig {
                endpoint: optional("INPAINTING_ENDPOINT"),
                timeout: Duration::from_secs(parse_num(&var, "INPAINTING_TIMEOUT_SECONDS", 120)?),
            },
            captioning: CaptioningConfig {
                endpoint: optional("CAPTIONING_ENDPOINT"),
                api_key: optional("CAPTIONING_API_KEY"),
                model: parse_or("CAPTIONING_MODEL", "gpt-4o-mini"),
            },
            generation: GenerationConfig {
                base_url: optional("GENERATION_BASE_URL"),
                timeout: Duration::from_secs(parse_num(&var, "GENERATION_TIMEOUT_SECONDS", 120)?),
            },
            rendering: RenderingConfig {
                fonts_dir: PathBuf::from(parse_or("FONTS_DIR", "fonts")),
                load_system_fonts: parse_num(&var, "LOAD_SYSTEM_FONTS", true)?,
                default_font_family: parse_or("DEFAULT_FONT_FAMILY", "arial.ttf"),
                default_font_size: parse_num(&var, "DEFAULT_FONT_SIZE", 24.0)?,
                default_font_color: parse_or("DEFAULT_FONT_COLOR", "#000000"),
                line_padding: parse_num(&var, "LINE_PADDING", 10)?,
                default_position: (
                    parse_num(&var, "DEFAULT_TEXT_X", DEFAULT_TEXT_POSITION.0)?,
                    parse_num(&var, "DEFAULT_TEXT_Y", DEFAULT_TEXT_POSITION.1)?,
                ),
                centered_font_size: parse_num(&var, "CENTERED_FONT_SIZE", 72.0)?,
            },
            output: OutputConfig {
                output_dir: PathBuf::from(parse_or("OUTPUT_DIR", "output")),
            },
            rate_limit: RateLimitConfig {
                enabled: parse_num(&var, "RATE_LIMIT_ENABLED", true)?,
                max_requests: parse_num(&var, "RATE_LIMIT_MAX_REQUESTS", 10)?,
                window_seconds: parse_num(&var, "RATE_LIMIT_WINDOW_SECONDS", 60)?,
            },
            circuit_breaker: BreakerConfig {
                failure_threshold: parse_num(&var, "BREAKER_FAILURE_THRESHOLD", 5)?,
                open_seconds: parse_num(&var, "BREAKER_OPEN_SECONDS", 60)?,
            },
            pipeline: PipelineConfig {
                max_concurrent_requests: parse_num(&var, "MAX_CONCURRENT_REQUESTS", num_cpus::get().max(1))?,
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.ocr.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.ocr.confidence_threshold,
            ));
        }

        if self.translation.backend != TranslationBackendKind::Disabled
            && !self.translation.endpoint.starts_with("http")
        {
            return Err(ConfigError::InvalidTranslationConfig(format!(
                "endpoint must be an http(s) URL, got '{}'",
                self.translation.endpoint
            )));
        }

        if self.rendering.default_font_size <= 0.0 || self.rendering.centered_font_size <= 0.0 {
            return Err(ConfigError::InvalidRenderingConfig(
                "font sizes must be > 0".to_string(),
            ));
        }

        if parse_hex_color(&self.rendering.default_font_color).is_none() {
            return Err(ConfigError::InvalidRenderingConfig(format!(
                "default font color must be #RRGGBB, got '{}'",
                self.rendering.default_font_color
            )));
        }

        if self.rate_limit.enabled {
            if self.rate_limit.max_requests == 0 {
                return Err(ConfigError::InvalidRateLimitConfig(
                    "max_requests must be > 0 when rate limiting is enabled".to_string(),
                ));
            }
            if self.rate_limit.window_seconds == 0 {
                return Err(ConfigError::InvalidRateLimitConfig(
                    "window_seconds must be > 0 when rate limiting is enabled".to_string(),
                ));
            }
        }

        if self.pipeline.max_concurrent_requests == 0 {
            return Err(ConfigError::InvalidConcurrency(
                self.pipeline.max_concurrent_requests,
            ));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.ocr.confidence_threshold
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.output.output_dir
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_seconds)
    }
}

fn parse_num<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
        Some(value) => value.parse().map_err(|_| ConfigError::EnvVarError {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

// Note: No Default implementation because loading can fail;
// tests use Config::from_vars.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&[]).unwrap();
        assert_eq!(config.confidence_threshold(), 20.0);
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
        assert_eq!(config.rendering.default_position, (50, 50));
        assert_eq!(config.rendering.line_padding, 10);
        assert_eq!(config.translation.backend, TranslationBackendKind::Dedicated);
        assert!(config.inpainting.endpoint.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(&[
            ("TRANSLATION_BACKEND", "chat"),
            ("RATE_LIMIT_MAX_REQUESTS", "3"),
            ("OUTPUT_DIR", "/tmp/out"),
            ("LOG_LEVEL", "debug"),
        ])
        .unwrap();
        assert_eq!(config.translation.backend, TranslationBackendKind::Chat);
        assert!(config.translation.endpoint.ends_with("/chat/completions"));
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.output_dir(), std::path::Path::new("/tmp/out"));
        assert_eq!(config.log_level(), Level::DEBUG);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            Config::from_vars(&[("OCR_CONFIDENCE_THRESHOLD", "120")]),
            Err(ConfigError::InvalidConfidenceThreshold(_))
        ));
        assert!(matches!(
            Config::from_vars(&[("RATE_LIMIT_MAX_REQUESTS", "0")]),
            Err(ConfigError::InvalidRateLimitConfig(_))
        ));
        assert!(matches!(
            Config::from_vars(&[("SERVER_PORT", "eighty")]),
            Err(ConfigError::EnvVarError { .. })
        ));
        assert!(matches!(
            Config::from_vars(&[("TRANSLATION_BACKEND", "carrier-pigeon")]),
            Err(ConfigError::EnvVarError { .. })
        ));
    }
}

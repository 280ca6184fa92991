// Data model, request/response messages and the stage outcome type

use chrono::{DateTime, FixedOffset, Utc};
use image::Rgba;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::core::languages::{Language, Platform, TimeZone};

/// Confidence threshold (0-100 scale) at or below which a token is ignored
/// for mask and position computation
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 20.0;

/// Anchor used when no confident token box exists
pub const DEFAULT_TEXT_POSITION: (i32, i32) = (50, 50);

/// Drawn when neither a translation nor the original text is available
pub const NO_TEXT_PLACEHOLDER: &str = "[No text found by OCR]";

/// Generate a fresh opaque image identifier
pub fn new_image_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Text recognized for one image, created right after region extraction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageContent {
    pub image_id: String,
    pub source_path: String,
    pub source_language: Language,
    /// May be empty when OCR found nothing
    pub extracted_text: String,
    pub created_at: DateTime<Utc>,
}

impl ImageContent {
    pub fn new(source_path: &str, source_language: Language, extracted_text: String) -> Self {
        Self {
            image_id: new_image_id(),
            source_path: source_path.to_string(),
            source_language,
            extracted_text,
            created_at: Utc::now(),
        }
    }
}

/// One translated + composited result per (image_id, target_language)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslatedContent {
    pub image_id: String,
    pub target_language: Language,
    pub translated_text: String,
    pub edited_image_path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
}

/// One planned post for a (platform, language) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostSchedule {
    pub image_id: String,
    pub platform: Platform,
    pub target_language: Language,
    pub time_zone: TimeZone,
    pub scheduled_time: DateTime<FixedOffset>,
    pub status: PostStatus,
}

/// A single recognized token with its box (pixels) and 0-100 confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToken {
    pub text: String,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

/// Result of the region extraction step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedRegions {
    /// Raw concatenated text, including low-confidence tokens
    pub text: String,
    /// Tokens above the confidence threshold, in reading order
    pub confident_tokens: Vec<TextToken>,
}

impl ExtractedRegions {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Top-left corner of the first confident box, used as the render anchor
    pub fn anchor(&self) -> Option<(i32, i32)> {
        self.confident_tokens
            .first()
            .map(|t| (t.left as i32, t.top as i32))
    }
}

/// Font style requested by the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FontStyle {
    /// Font family name or path to a font file
    pub family: String,
    pub size: f32,
    /// `#RRGGBB` or `#RRGGBBAA`
    pub color: String,
}

impl Default for FontStyle {
    fn default() -> Self {
        Self {
            family: "arial.ttf".to_string(),
            size: 24.0,
            color: "#000000".to_string(),
        }
    }
}

impl FontStyle {
    /// Build from the loose string map callers send, falling back per field
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let default = Self::default();
        Self {
            family: map
                .get("family")
                .filter(|s| !s.trim().is_empty())
                .cloned()
                .unwrap_or(default.family),
            size: map
                .get("size")
                .and_then(|s| s.trim().parse::<f32>().ok())
                .filter(|s| *s > 0.0)
                .unwrap_or(default.size),
            color: map
                .get("color")
                .filter(|c| parse_hex_color(c).is_some())
                .cloned()
                .unwrap_or(default.color),
        }
    }

    pub fn rgba(&self) -> Rgba<u8> {
        parse_hex_color(&self.color).unwrap_or(Rgba([0, 0, 0, 255]))
    }
}

/// Parse `#RRGGBB` / `#RRGGBBAA` (leading `#` optional)
pub fn parse_hex_color(value: &str) -> Option<Rgba<u8>> {
    let hex = value.trim().trim_start_matches('#');
    if !hex.is_ascii() || (hex.len() != 6 && hex.len() != 8) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
    Some(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

/// Why a stage substituted a default instead of its real result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    OcrFailed(String),
    TranslationUnavailable,
    TranslationFailed(String),
    InpaintingUnavailable,
    InpaintingFailed(String),
    NothingToErase,
    CaptioningUnavailable,
    CaptioningFailed(String),
    GenerationUnavailable,
    GenerationFailed(String),
}

impl FallbackReason {
    /// Stable label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            FallbackReason::OcrFailed(_) => "ocr_failed",
            FallbackReason::TranslationUnavailable => "translation_unavailable",
            FallbackReason::TranslationFailed(_) => "translation_failed",
            FallbackReason::InpaintingUnavailable => "inpainting_unavailable",
            FallbackReason::InpaintingFailed(_) => "inpainting_failed",
            FallbackReason::NothingToErase => "nothing_to_erase",
            FallbackReason::CaptioningUnavailable => "captioning_unavailable",
            FallbackReason::CaptioningFailed(_) => "captioning_failed",
            FallbackReason::GenerationUnavailable => "generation_unavailable",
            FallbackReason::GenerationFailed(_) => "generation_failed",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::OcrFailed(e)
            | FallbackReason::TranslationFailed(e)
            | FallbackReason::InpaintingFailed(e)
            | FallbackReason::CaptioningFailed(e)
            | FallbackReason::GenerationFailed(e) => write!(f, "{}: {}", self.label(), e),
            _ => f.write_str(self.label()),
        }
    }
}

/// Value produced by a stage, either genuinely or by the documented fallback
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Fallback { value: T, reason: FallbackReason },
}

impl<T> Outcome<T> {
    /// The substitution policy: keep the value on success, otherwise use the
    /// fallback and tag the failure.
    pub fn recover<E>(
        result: Result<T, E>,
        fallback: impl FnOnce() -> T,
        tag: impl FnOnce(E) -> FallbackReason,
    ) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::Fallback {
                value: fallback(),
                reason: tag(e),
            },
        }
    }

    pub fn fallback(value: T, reason: FallbackReason) -> Self {
        Outcome::Fallback { value, reason }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Success(v) | Outcome::Fallback { value: v, .. } => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Success(v) | Outcome::Fallback { value: v, .. } => v,
        }
    }

    pub fn reason(&self) -> Option<&FallbackReason> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Fallback { reason, .. } => Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Outcome::Fallback { .. })
    }
}

/// Per-language failure slot in a response
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LanguageFailure {
    pub target_language: Language,
    pub error: String,
}

// ===== Transport messages =====

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessImageRequest {
    pub image_path: String,
    pub source_language: Language,
    pub target_languages: Vec<Language>,
    #[serde(default)]
    pub font_style: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessImageResponse {
    pub image_id: String,
    pub original_content: ImageContent,
    pub translated_contents: Vec<TranslatedContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<LanguageFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<FallbackReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessImageResponse {
    /// Response for a request that failed as a whole: fresh id, empty text
    pub fn failed(image_path: &str, source_language: Language, error: impl Into<String>) -> Self {
        let content = ImageContent::new(image_path, source_language, String::new());
        Self {
            image_id: content.image_id.clone(),
            original_content: content,
            translated_contents: Vec::new(),
            failures: Vec::new(),
            fallbacks: Vec::new(),
            error: Some(error.into()),
        }
    }
}

fn default_optimal_time() -> String {
    "18:00".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulePostRequest {
    pub image_id: String,
    pub platforms: Vec<Platform>,
    pub language_time_zones: HashMap<Language, TimeZone>,
    #[serde(default = "default_optimal_time")]
    pub optimal_time: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SchedulePostResponse {
    pub schedules: Vec<PostSchedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Re-run translate and composite for one stored image
#[derive(Debug, Clone, Deserialize)]
pub struct TranslateImageRequest {
    pub image_id: String,
    pub target_language: Language,
    #[serde(default)]
    pub font_style: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegenerateImageRequest {
    pub image_path: String,
    pub source_language: Language,
    pub target_languages: Vec<Language>,
    #[serde(default)]
    pub font_style: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegenerateImageResponse {
    pub image_id: String,
    pub original_content: ImageContent,
    pub background_description: String,
    pub translated_contents: Vec<TranslatedContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<LanguageFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<FallbackReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_quote_source() -> Language {
    Language::English
}

/// Caller-supplied quote drawn over an image generated from `image_prompt`
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteImageRequest {
    pub quote: String,
    #[serde(default = "default_quote_source")]
    pub source_language: Language,
    pub target_language: Language,
    pub image_prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteImageResponse {
    pub target_language: Language,
    pub translated_text: String,
    /// Empty when no image could be produced
    pub image_path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<FallbackReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#000000"), Some(Rgba([0, 0, 0, 255])));
        assert_eq!(parse_hex_color("ff8000"), Some(Rgba([255, 128, 0, 255])));
        assert_eq!(parse_hex_color("#ffffff80"), Some(Rgba([255, 255, 255, 128])));
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#gg0000"), None);
    }

    #[test]
    fn test_quote_request_defaults_to_english_source() {
        let request: QuoteImageRequest = serde_json::from_str(
            r#"{"quote":"Be kind","target_language":"hi","image_prompt":"sunrise over hills"}"#,
        )
        .unwrap();
        assert_eq!(request.source_language, Language::English);
        assert_eq!(request.target_language, Language::Hindi);
    }

    #[test]
    fn test_font_style_from_map_falls_back_per_field() {
        let mut map = HashMap::new();
        map.insert("family".to_string(), "Noto Sans".to_string());
        map.insert("size".to_string(), "not-a-number".to_string());
        map.insert("color".to_string(), "#FF0000".to_string());

        let style = FontStyle::from_map(&map);
        assert_eq!(style.family, "Noto Sans");
        assert_eq!(style.size, 24.0);
        assert_eq!(style.rgba(), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_outcome_recover() {
        let ok: Outcome<String> = Outcome::recover(
            Ok::<_, String>("hola".to_string()),
            || "hello".to_string(),
            FallbackReason::TranslationFailed,
        );
        assert!(!ok.is_fallback());
        assert_eq!(ok.value(), "hola");

        let failed: Outcome<String> = Outcome::recover(
            Err("timeout".to_string()),
            || "hello".to_string(),
            FallbackReason::TranslationFailed,
        );
        assert!(failed.is_fallback());
        assert_eq!(
            failed.reason(),
            Some(&FallbackReason::TranslationFailed("timeout".to_string()))
        );
        assert_eq!(failed.into_value(), "hello");
    }

    #[test]
    fn test_failed_response_allocates_fresh_id() {
        let a = ProcessImageResponse::failed("x.png", Language::English, "boom");
        let b = ProcessImageResponse::failed("x.png", Language::English, "boom");
        assert_ne!(a.image_id, b.image_id);
        assert_eq!(a.image_id, a.original_content.image_id);
        assert!(a.original_content.extracted_text.is_empty());
        assert!(a.translated_contents.is_empty());
        assert_eq!(a.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_anchor_uses_first_confident_token() {
        let regions = ExtractedRegions {
            text: "HELLO WORLD".to_string(),
            confident_tokens: vec![
                TextToken {
                    text: "HELLO".to_string(),
                    left: 12,
                    top: 34,
                    width: 50,
                    height: 20,
                    confidence: 91.0,
                },
                TextToken {
                    text: "WORLD".to_string(),
                    left: 70,
                    top: 34,
                    width: 50,
                    height: 20,
                    confidence: 88.0,
                },
            ],
        };
        assert_eq!(regions.anchor(), Some((12, 34)));
        assert_eq!(ExtractedRegions::empty().anchor(), None);
    }

    #[test]
    fn test_schedule_request_default_time() {
        let req: SchedulePostRequest = serde_json::from_str(
            r#"{"image_id":"img-42","platforms":["instagram"],"language_time_zones":{"es":"Europe/Paris"}}"#,
        )
        .unwrap();
        assert_eq!(req.optimal_time, "18:00");
        assert_eq!(req.language_time_zones[&Language::Spanish], TimeZone::Cet);
    }
}

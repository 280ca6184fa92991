// Closed vocabularies shared by the pipeline and the scheduler
//
// Vendor-specific codes live here as small static tables so that the rest of
// the crate only ever deals with the enums.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported source/target languages (serialized by wire code)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "es")]
    Spanish,
    #[serde(rename = "fr")]
    French,
    #[serde(rename = "de")]
    German,
    #[serde(rename = "zh-cn")]
    Chinese,
    #[serde(rename = "ja")]
    Japanese,
    #[serde(rename = "hi")]
    Hindi,
    #[serde(rename = "ar")]
    Arabic,
}

impl Language {
    pub const ALL: [Language; 8] = [
        Language::English,
        Language::Spanish,
        Language::French,
        Language::German,
        Language::Chinese,
        Language::Japanese,
        Language::Hindi,
        Language::Arabic,
    ];

    /// Wire code, also used by the dedicated translate endpoint
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Spanish => "es",
            Language::French => "fr",
            Language::German => "de",
            Language::Chinese => "zh-cn",
            Language::Japanese => "ja",
            Language::Hindi => "hi",
            Language::Arabic => "ar",
        }
    }

    /// Tesseract traineddata name
    pub fn tesseract_code(&self) -> &'static str {
        match self {
            Language::English => "eng",
            Language::Spanish => "spa",
            Language::French => "fra",
            Language::German => "deu",
            Language::Chinese => "chi_sim",
            Language::Japanese => "jpn",
            Language::Hindi => "hin",
            Language::Arabic => "ara",
        }
    }

    /// Human-readable name for prompt-style backends
    pub fn english_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
            Language::Chinese => "Simplified Chinese",
            Language::Japanese => "Japanese",
            Language::Hindi => "Hindi",
            Language::Arabic => "Arabic",
        }
    }

    pub fn from_code(code: &str) -> Option<Language> {
        let code = code.trim().to_lowercase();
        Self::ALL.iter().copied().find(|l| l.code() == code)
    }

    /// Replace the pipe separator OCR tends to emit with the script's own
    /// clause mark. Languages without a dedicated mark are left untouched.
    pub fn localize_separators(&self, text: &str) -> String {
        match self {
            Language::Hindi => text.replace('|', "\u{0964}"),
            Language::Arabic => text.replace('|', "\u{060C}"),
            _ => text.to_string(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Audience time zones (serialized by IANA name)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeZone {
    #[serde(rename = "UTC")]
    Utc,
    #[serde(rename = "America/New_York")]
    Est,
    #[serde(rename = "America/Los_Angeles")]
    Pst,
    #[serde(rename = "Europe/Paris")]
    Cet,
    #[serde(rename = "Asia/Tokyo")]
    Jst,
    #[serde(rename = "Asia/Shanghai")]
    Cst,
}

impl TimeZone {
    pub fn iana_name(&self) -> &'static str {
        match self {
            TimeZone::Utc => "UTC",
            TimeZone::Est => "America/New_York",
            TimeZone::Pst => "America/Los_Angeles",
            TimeZone::Cet => "Europe/Paris",
            TimeZone::Jst => "Asia/Tokyo",
            TimeZone::Cst => "Asia/Shanghai",
        }
    }

    pub fn tz(&self) -> Tz {
        match self {
            TimeZone::Utc => chrono_tz::UTC,
            TimeZone::Est => chrono_tz::America::New_York,
            TimeZone::Pst => chrono_tz::America::Los_Angeles,
            TimeZone::Cet => chrono_tz::Europe::Paris,
            TimeZone::Jst => chrono_tz::Asia::Tokyo,
            TimeZone::Cst => chrono_tz::Asia::Shanghai,
        }
    }
}

impl fmt::Display for TimeZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.iana_name())
    }
}

/// Social platforms a post can be planned for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Twitter,
    Facebook,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
            Platform::Facebook => "facebook",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_wire_codes() {
        assert_eq!(serde_json::to_string(&Language::Chinese).unwrap(), "\"zh-cn\"");
        let lang: Language = serde_json::from_str("\"es\"").unwrap();
        assert_eq!(lang, Language::Spanish);
        assert_eq!(Language::from_code(" FR "), Some(Language::French));
        assert_eq!(Language::from_code("xx"), None);
    }

    #[test]
    fn test_tesseract_codes() {
        assert_eq!(Language::English.tesseract_code(), "eng");
        assert_eq!(Language::Chinese.tesseract_code(), "chi_sim");
    }

    #[test]
    fn test_separator_localization() {
        assert_eq!(Language::Hindi.localize_separators("a|b"), "a\u{0964}b");
        assert_eq!(Language::Arabic.localize_separators("a|b"), "a\u{060C}b");
        assert_eq!(Language::French.localize_separators("a|b"), "a|b");
    }

    #[test]
    fn test_time_zone_mapping() {
        let tz: TimeZone = serde_json::from_str("\"Europe/Paris\"").unwrap();
        assert_eq!(tz, TimeZone::Cet);
        assert_eq!(tz.tz(), chrono_tz::Europe::Paris);
        assert_eq!(serde_json::to_string(&Platform::Twitter).unwrap(), "\"twitter\"");
    }
}

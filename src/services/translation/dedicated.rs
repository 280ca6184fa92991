// Dedicated translate endpoint: POST {text, source_language, target_language}

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{build_http_client, TranslationBackend};
use crate::core::errors::{TranslationError, TranslationResult};
use crate::core::languages::Language;

pub struct DedicatedTranslator {
    endpoint: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    source_language: &'static str,
    target_language: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    translated_text: Option<String>,
    #[serde(default)]
    result: Option<String>,
}

impl DedicatedTranslator {
    pub fn new(endpoint: String, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint,
            api_key,
            http_client: build_http_client(timeout)?,
        })
    }
}

/// `translated_text`, else `result`; blank counts as missing
fn extract_translation(body: &str) -> TranslationResult<String> {
    let parsed: TranslateResponse = serde_json::from_str(body)
        .map_err(|e| TranslationError::InvalidResponse(e.to_string()))?;

    parsed
        .translated_text
        .filter(|t| !t.trim().is_empty())
        .or(parsed.result.filter(|t| !t.trim().is_empty()))
        .ok_or_else(|| {
            TranslationError::InvalidResponse("no translated_text or result field".to_string())
        })
}

#[async_trait]
impl TranslationBackend for DedicatedTranslator {
    async fn translate(
        &self,
        text: &str,
        source: Language,
        target: Language,
    ) -> TranslationResult<String> {
        let request = TranslateRequest {
            text,
            source_language: source.code(),
            target_language: target.code(),
        };

        let mut builder = self.http_client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TranslationError::BadStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let translated = extract_translation(&body)?;
        debug!("Dedicated endpoint translated to {}", target);
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_translated_text() {
        let body = r#"{"translated_text":"Hola","result":"ignored"}"#;
        assert_eq!(extract_translation(body).unwrap(), "Hola");
    }

    #[test]
    fn test_falls_back_to_result_field() {
        let body = r#"{"translated_text":"  ","result":"Bonjour"}"#;
        assert_eq!(extract_translation(body).unwrap(), "Bonjour");
    }

    #[test]
    fn test_missing_fields_is_invalid() {
        assert!(matches!(
            extract_translation(r#"{"status":"ok"}"#),
            Err(TranslationError::InvalidResponse(_))
        ));
        assert!(matches!(
            extract_translation("<html>"),
            Err(TranslationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_request_uses_wire_codes() {
        let request = TranslateRequest {
            text: "hello",
            source_language: Language::English.code(),
            target_language: Language::Chinese.code(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["target_language"], "zh-cn");
    }
}

// Chat-completion translation backend
//
// One prompt per (text, target) pair, temperature 0, the answer is read from
// choices[0].message.content.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{build_http_client, TranslationBackend};
use crate::core::errors::{TranslationError, TranslationResult};
use crate::core::languages::Language;

/// Retry configuration for transient failures (timeouts, 5xx, 429)
const MAX_RETRIES: u32 = 2;
const INITIAL_RETRY_DELAY_MS: u64 = 500;
const MAX_RETRY_DELAY_MS: u64 = 4000;

pub struct ChatTranslator {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatTranslator {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            endpoint,
            api_key,
            model,
            http_client: build_http_client(timeout)?,
        })
    }

    fn build_request(&self, text: &str, target: Language) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: translation_prompt(text, target),
            }],
            temperature: 0.0,
            stream: false,
        }
    }
}

fn translation_prompt(text: &str, target: Language) -> String {
    format!(
        "Translate the following text to {}: {}. Only output the translated text.",
        target.english_name(),
        text
    )
}

fn extract_content(body: &str) -> TranslationResult<String> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| TranslationError::InvalidResponse(e.to_string()))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| TranslationError::InvalidResponse("empty completion".to_string()))
}

#[async_trait]
impl TranslationBackend for ChatTranslator {
    async fn translate(
        &self,
        text: &str,
        _source: Language,
        target: Language,
    ) -> TranslationResult<String> {
        let request = self.build_request(text, target);
        let mut retry_delay_ms = INITIAL_RETRY_DELAY_MS;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                warn!("Chat translation retry {} after {}ms", attempt, retry_delay_ms);
                tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
                retry_delay_ms = (retry_delay_ms * 2).min(MAX_RETRY_DELAY_MS);
            }

            let mut builder = self.http_client.post(&self.endpoint).json(&request);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }

            let response = match builder.send().await {
                Ok(resp) => resp,
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < MAX_RETRIES => continue,
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if (status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS)
                && attempt < MAX_RETRIES
            {
                continue;
            }

            let body = response.text().await?;
            if !status.is_success() {
                return Err(TranslationError::BadStatus {
                    status: status.as_u16(),
                    body: body.chars().take(200).collect(),
                });
            }

            let translated = extract_content(&body)?;
            debug!("Chat backend translated to {} ({} attempts)", target, attempt + 1);
            return Ok(translated);
        }

        Err(TranslationError::InvalidResponse(format!(
            "gave up after {} attempts",
            MAX_RETRIES + 1
        )))
    }
}

//! Prompt translation, best-effort and fail-open.
//!
//! Prompts that already read as English are sent as-is; any failure of
//! the translation call silently falls back to the original text so
//! the primary flow is never blocked.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const SYSTEM_PROMPT: &str =
    "You are a professional translator. Translate the user's prompt into English for an AI \
     image generator. Preserve the intent and style. Reply with the translation only, no \
     explanations.";

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct Translator {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    enabled: bool,
}

impl Translator {
    pub fn new(api_base: String, api_key: Option<String>, model: String, enable: bool) -> Self {
        let api_key = api_key.unwrap_or_default();
        let enabled = enable && !api_key.is_empty() && !api_base.is_empty() && !model.is_empty();
        if enable && !enabled {
            tracing::warn!("[Translator] Translation configured but incomplete, staying off");
        }
        Self {
            client: Client::new(),
            api_base,
            api_key,
            model,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Translate the prompt into English. Returns the original text when
    /// translation is off, unnecessary, or fails.
    pub async fn translate(&self, prompt: &str) -> String {
        if !self.enabled || prompt.trim().is_empty() || is_mostly_english(prompt) {
            return prompt.to_string();
        }

        match self.request(prompt).await {
            Ok(Some(translated)) if !translated.is_empty() => {
                tracing::info!("[Translator] '{}' -> '{}'", prompt, translated);
                translated
            }
            Ok(_) => {
                tracing::warn!("[Translator] Empty translation, keeping original prompt");
                prompt.to_string()
            }
            Err(e) => {
                tracing::warn!("[Translator] Translation failed, keeping original prompt: {}", e);
                prompt.to_string()
            }
        }
    }

    async fn request(&self, prompt: &str) -> Result<Option<String>, reqwest::Error> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ]
        });

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;

        let parsed: ChatCompletionResponse = response.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| {
                text.trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
                    .to_string()
            }))
    }
}

/// Heuristic: above 70% ASCII letters means the prompt is already
/// English and does not need a round trip.
pub fn is_mostly_english(text: &str) -> bool {
    let total = text.trim().chars().count();
    if total == 0 {
        return false;
    }
    let english = text.chars().filter(|c| c.is_ascii_alphabetic()).count();
    english as f64 / total as f64 > 0.7
}

//! Provider client: one place that knows the endpoint shape, the retry
//! policy per operation kind, and which generation config each
//! operation wants.

use super::request::{CurrentTurn, RequestBuilder};
use super::response::{self, classify, Outcome};
use super::transport::{RetryPolicy, Transport};
use super::wire::GenerationConfig;
use super::ProviderError;
use crate::config::Settings;
use crate::session::ChatMessage;
use anyhow::Result;
use std::time::Duration;

const REVERSE_PROMPT: &str =
    "Describe this image in detail: the main subjects, the scene, the style, the colors and \
     any other defining features. If the image contains text, transcribe it. Answer as a \
     single prompt suitable for regenerating the image.";

pub struct GeminiClient {
    transport: Transport,
    builder: RequestBuilder,
    model: String,
    base_url: String,
    proxy_service_url: Option<String>,
    api_key: String,
    generate_policy: RetryPolicy,
    edit_policy: RetryPolicy,
    analysis_policy: RetryPolicy,
}

impl GeminiClient {
    pub fn from_settings(settings: &Settings, api_key: String) -> Result<Self> {
        let proxy_service_url = settings
            .proxy
            .use_proxy_service
            .then(|| settings.proxy.proxy_service_url.clone())
            .filter(|url| !url.is_empty());

        // A raw HTTP proxy is honored only when not routing through the
        // proxy service; the service replaces the provider URL entirely.
        let raw_proxy = (settings.proxy.enable_proxy
            && proxy_service_url.is_none()
            && !settings.proxy.proxy_url.is_empty())
        .then(|| settings.proxy.proxy_url.as_str());

        let transport = Transport::new(
            raw_proxy,
            Duration::from_secs(settings.limits.request_timeout_seconds),
        )?;

        let builder = RequestBuilder {
            max_request_bytes: settings.limits.max_request_bytes,
            history_image_max_edge: settings.limits.history_image_max_edge,
            history_image_quality: settings.limits.history_image_quality,
            current_image_max_edge: settings.limits.current_image_max_edge,
            current_image_quality: settings.limits.current_image_quality,
        };

        Ok(Self {
            transport,
            builder,
            model: settings.api.model.clone(),
            base_url: settings.api.base_url.clone(),
            proxy_service_url,
            api_key,
            generate_policy: settings.retry.generate.to_policy(),
            edit_policy: settings.retry.edit.to_policy(),
            analysis_policy: settings.retry.analysis.to_policy(),
        })
    }

    fn endpoint(&self) -> (String, Vec<(String, String)>) {
        let base = self
            .proxy_service_url
            .as_deref()
            .unwrap_or(&self.base_url)
            .trim_end_matches('/');
        let url = format!("{}/v1beta/models/{}:generateContent", base, self.model);
        let query = vec![("key".to_string(), self.api_key.clone())];
        (url, query)
    }

    async fn call(
        &self,
        turn: CurrentTurn<'_>,
        history: &[ChatMessage],
        config: GenerationConfig,
        policy: &RetryPolicy,
    ) -> Result<Outcome, ProviderError> {
        let built = self
            .builder
            .build(turn, history, config)
            .await
            .map_err(ProviderError::Build)?;
        tracing::info!(
            "[GeminiClient] Request payload {} bytes{}",
            built.serialized_len,
            if built.degraded { " (history dropped)" } else { "" }
        );

        let (url, query) = self.endpoint();
        let response = self
            .transport
            .post_generate(&url, &query, &built.body, policy)
            .await?;
        Ok(classify(response))
    }

    /// Generate images from a prompt, with conversation context.
    pub async fn generate(
        &self,
        prompt: &str,
        history: &[ChatMessage],
    ) -> Result<Outcome, ProviderError> {
        self.call(
            CurrentTurn {
                prompt,
                images: vec![],
            },
            history,
            GenerationConfig::image_default(),
            &self.generate_policy,
        )
        .await
    }

    /// Edit an image according to the prompt, with conversation context.
    pub async fn edit(
        &self,
        prompt: &str,
        image: &[u8],
        history: &[ChatMessage],
    ) -> Result<Outcome, ProviderError> {
        self.call(
            CurrentTurn {
                prompt,
                images: vec![image],
            },
            history,
            GenerationConfig::image_default(),
            &self.edit_policy,
        )
        .await
    }

    /// Merge two images into one, single turn.
    pub async fn merge(
        &self,
        prompt: &str,
        first: &[u8],
        second: &[u8],
    ) -> Result<Outcome, ProviderError> {
        self.call(
            CurrentTurn {
                prompt,
                images: vec![first, second],
            },
            &[],
            GenerationConfig::image_default(),
            &self.edit_policy,
        )
        .await
    }

    /// Ask a text question about an image. Returns the provider's text,
    /// or `None` when the response carried none.
    pub async fn analyze(
        &self,
        image: &[u8],
        question: &str,
    ) -> Result<Option<String>, ProviderError> {
        let built = self
            .builder
            .build(
                CurrentTurn {
                    prompt: question,
                    images: vec![image],
                },
                &[],
                GenerationConfig::text_default(),
            )
            .await
            .map_err(ProviderError::Build)?;

        let (url, query) = self.endpoint();
        let response = self
            .transport
            .post_generate(&url, &query, &built.body, &self.analysis_policy)
            .await?;
        Ok(response::text_of(&response))
    }

    /// Reverse-engineer a generation prompt from an image.
    pub async fn reverse_prompt(&self, image: &[u8]) -> Result<Option<String>, ProviderError> {
        self.analyze(image, REVERSE_PROMPT).await
    }
}

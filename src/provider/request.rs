//! Request Builder
//!
//! Turns (prompt, optional images, optional history) into a provider
//! payload. Every embedded image is compressed; historical file
//! references are resolved from disk and skipped (with a warning) when
//! unreadable. A serialized payload over the byte ceiling is rebuilt
//! once without history.

use super::wire::{Content, GenerateContentRequest, GenerationConfig, InlineData, Part};
use crate::imaging::{self, JPEG_MIME};
use crate::session::{ChatMessage, MessagePart};
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// The turn being sent right now: prompt text plus zero, one (edit) or
/// two (merge) images.
pub struct CurrentTurn<'a> {
    pub prompt: &'a str,
    pub images: Vec<&'a [u8]>,
}

pub struct BuiltRequest {
    pub body: serde_json::Value,
    pub serialized_len: usize,
    /// True when the history was dropped to satisfy the size ceiling.
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    pub max_request_bytes: usize,
    pub history_image_max_edge: u32,
    pub history_image_quality: u8,
    pub current_image_max_edge: u32,
    pub current_image_quality: u8,
}

impl RequestBuilder {
    pub async fn build(
        &self,
        turn: CurrentTurn<'_>,
        history: &[ChatMessage],
        config: GenerationConfig,
    ) -> Result<BuiltRequest> {
        let current = self.current_content(&turn, !history.is_empty());

        let mut contents = self.history_contents(history).await;
        contents.push(current.clone());

        let request = GenerateContentRequest {
            contents,
            generation_config: Some(config.clone()),
        };
        let body = serde_json::to_value(&request).context("Failed to serialize request")?;
        let serialized_len = body.to_string().len();

        if serialized_len <= self.max_request_bytes {
            return Ok(BuiltRequest {
                body,
                serialized_len,
                degraded: false,
            });
        }

        tracing::warn!(
            "[RequestBuilder] Payload {} bytes exceeds the {} byte ceiling, rebuilding without history",
            serialized_len,
            self.max_request_bytes
        );

        // Single fallback: current turn only, no iterative shrinking.
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: None,
                ..current
            }],
            generation_config: Some(config),
        };
        let body = serde_json::to_value(&request).context("Failed to serialize request")?;
        let serialized_len = body.to_string().len();
        Ok(BuiltRequest {
            body,
            serialized_len,
            degraded: true,
        })
    }

    fn current_content(&self, turn: &CurrentTurn<'_>, with_role: bool) -> Content {
        let mut parts = Vec::new();
        if !turn.prompt.is_empty() {
            parts.push(Part::Text {
                text: turn.prompt.to_string(),
            });
        }
        for image in &turn.images {
            parts.push(self.inline_part(image, self.current_image_max_edge, self.current_image_quality));
        }
        Content {
            role: with_role.then(|| "user".to_string()),
            parts,
        }
    }

    async fn history_contents(&self, history: &[ChatMessage]) -> Vec<Content> {
        let mut contents = Vec::with_capacity(history.len());
        for message in history {
            let mut parts = Vec::new();
            for part in &message.parts {
                match part {
                    MessagePart::Text(text) => {
                        parts.push(Part::Text { text: text.clone() });
                    }
                    MessagePart::InlineImage { data, .. } => {
                        parts.push(self.inline_part(
                            data,
                            self.history_image_max_edge,
                            self.history_image_quality,
                        ));
                    }
                    MessagePart::ImageRef(path) => match tokio::fs::read(path).await {
                        Ok(data) => {
                            parts.push(self.inline_part(
                                &data,
                                self.history_image_max_edge,
                                self.history_image_quality,
                            ));
                        }
                        Err(e) => {
                            tracing::warn!(
                                "[RequestBuilder] Skipping unreadable history image {:?}: {}",
                                path,
                                e
                            );
                        }
                    },
                }
            }
            if parts.is_empty() {
                // The provider rejects empty part lists.
                continue;
            }
            contents.push(Content {
                role: Some(message.role.wire_name().to_string()),
                parts,
            });
        }
        contents
    }

    fn inline_part(&self, bytes: &[u8], max_edge: u32, quality: u8) -> Part {
        let compressed = imaging::compress(bytes, max_edge, quality);
        Part::InlineData {
            inline_data: InlineData {
                mime_type: JPEG_MIME.to_string(),
                data: BASE64.encode(compressed),
            },
        }
    }
}

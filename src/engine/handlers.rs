//! Command and flow processors. Each one runs to a single user-facing
//! outcome; unexpected failures are converted to one chat message by
//! the dispatcher.

use super::Engine;
use crate::chat::{deliver_image, ChatOutbound, ImageMessage, TextMessage};
use crate::imaging::JPEG_MIME;
use crate::provider::{localize_refusal, ImageReply, Outcome};
use crate::session::{Expectation, MessagePart, Role, SessionType};
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;

const MSG_NO_API_KEY: &str =
    "The provider API key is not configured. Set GEMINI_API_KEY and restart.";
const MSG_NO_RECENT_IMAGE: &str =
    "No recent image found. Generate one first, or upload the image you want to edit.";
const MSG_ANALYSIS_FAILED: &str = "Image analysis failed, please try again later.";
const MSG_WORKING_ANALYSIS: &str = "Analyzing the image, one moment...";
const DEFAULT_ANALYSIS_QUESTION: &str =
    "Describe the content of this image: the main subjects, the scene, the style and the \
     colors. Keep the description clear and concise.";
const DEFAULT_MERGE_PROMPT: &str =
    "Merge these two images into one cohesive, well-composed picture.";

impl Engine {
    pub(super) async fn cmd_generate(
        &self,
        out: &dyn ChatOutbound,
        msg: &TextMessage,
        prompt: &str,
    ) -> Result<()> {
        let chat = msg.chat_id.as_str();
        let user = msg.sender_id.as_str();
        let key = user;

        if prompt.is_empty() {
            out.send_text(
                chat,
                &format!(
                    "Add a description after the command, e.g. \"{} a red bicycle at sunset\".",
                    self.command_word(&self.settings.commands.generate)
                ),
            )
            .await?;
            return Ok(());
        }
        if self.api_key.is_empty() {
            out.send_text(chat, MSG_NO_API_KEY).await?;
            return Ok(());
        }
        self.charge_points(user, self.settings.points.generate_cost, "generate");

        let conversation = self
            .conversations
            .get_or_reset(key, SessionType::Generate)
            .await;
        let prompt = self.effective_prompt(user, prompt).await;

        let outcome = self.client.generate(&prompt, &conversation.messages).await?;
        match outcome {
            Outcome::Success { pairs, final_text } => {
                self.send_results(out, chat, key, &pairs, final_text.as_deref())
                    .await?;
                self.conversations
                    .append(key, Role::User, vec![MessagePart::Text(prompt)])
                    .await;
                let reply = final_text.unwrap_or_else(|| "Image generated.".to_string());
                self.conversations
                    .append(key, Role::Model, vec![MessagePart::Text(reply)])
                    .await;
            }
            other => {
                out.send_text(chat, &outcome_message(&other)).await?;
            }
        }
        Ok(())
    }

    pub(super) async fn cmd_edit(
        &self,
        out: &dyn ChatOutbound,
        msg: &TextMessage,
        prompt: &str,
    ) -> Result<()> {
        let chat = msg.chat_id.as_str();
        let user = msg.sender_id.as_str();
        let key = user;

        if prompt.is_empty() {
            out.send_text(
                chat,
                &format!(
                    "Describe the change after the command, e.g. \"{} make the sky stormy\".",
                    self.command_word(&self.settings.commands.edit)
                ),
            )
            .await?;
            return Ok(());
        }
        if self.api_key.is_empty() {
            out.send_text(chat, MSG_NO_API_KEY).await?;
            return Ok(());
        }
        let Some(image) = self.images.recall(key).await else {
            out.send_text(chat, MSG_NO_RECENT_IMAGE).await?;
            return Ok(());
        };
        self.charge_points(user, self.settings.points.edit_cost, "edit");

        let conversation = self.conversations.get_or_reset(key, SessionType::Edit).await;
        let prompt = self.effective_prompt(user, prompt).await;
        out.send_text(chat, "Editing the image, one moment...").await?;

        let outcome = self
            .client
            .edit(&prompt, &image, &conversation.messages)
            .await?;
        match outcome {
            Outcome::Success { pairs, final_text } => {
                let Some(reply) = pairs.into_iter().last() else {
                    // A text-only reply to an edit is a soft refusal.
                    let text = final_text.unwrap_or_else(|| {
                        "The image could not be edited, please try a different description."
                            .to_string()
                    });
                    out.send_text(chat, &localize_refusal(&text)).await?;
                    return Ok(());
                };

                // Persist first: an IO failure aborts before any session
                // state is touched.
                let path = self.images.persist(key, &reply.bytes, "edited").await?;
                self.images.remember(key, user, &reply.bytes).await;

                self.conversations
                    .append(key, Role::User, vec![MessagePart::Text(prompt)])
                    .await;
                let mut parts = Vec::new();
                let caption = if reply.caption.is_empty() {
                    final_text
                } else {
                    Some(reply.caption.clone())
                };
                if let Some(text) = caption.filter(|t| !t.is_empty()) {
                    parts.push(MessagePart::Text(text));
                }
                parts.push(MessagePart::ImageRef(path.clone()));
                let history = self.conversations.append(key, Role::Model, parts).await;

                if history.len() <= 2 {
                    out.send_text(
                        chat,
                        &format!(
                            "Image edited. Keep sending edit commands to refine it; send \"{}\" \
                             when you are done.",
                            self.command_word(&self.settings.commands.exit_session)
                        ),
                    )
                    .await?;
                }

                if let Err(e) = deliver_image(out, chat, &reply.bytes, Some(&path)).await {
                    tracing::error!("[Engine] Edited image delivery failed: {:#}", e);
                    out.send_text(chat, "The edited image could not be delivered, please retry.")
                        .await?;
                }
            }
            other => {
                out.send_text(chat, &outcome_message(&other)).await?;
            }
        }
        Ok(())
    }

    pub(super) async fn cmd_reference(
        &self,
        out: &dyn ChatOutbound,
        msg: &TextMessage,
        prompt: &str,
    ) -> Result<()> {
        let chat = msg.chat_id.as_str();
        if prompt.is_empty() {
            out.send_text(
                chat,
                &format!(
                    "Describe the edit after the command, e.g. \"{} put the subject on a beach\".",
                    self.command_word(&self.settings.commands.reference_edit)
                ),
            )
            .await?;
            return Ok(());
        }
        self.waiting
            .expect(
                &msg.sender_id,
                Expectation::ReferenceEdit {
                    prompt: prompt.to_string(),
                },
            )
            .await;
        out.send_text(
            chat,
            &format!(
                "Send the reference image to edit within {}.",
                wait_window(self.settings.waits.reference_seconds)
            ),
        )
        .await?;
        Ok(())
    }

    pub(super) async fn cmd_merge(
        &self,
        out: &dyn ChatOutbound,
        msg: &TextMessage,
        prompt: &str,
    ) -> Result<()> {
        let chat = msg.chat_id.as_str();
        if prompt.is_empty() {
            out.send_text(
                chat,
                &format!(
                    "Describe the merge after the command, e.g. \"{} place the cat in the \
                     landscape\".",
                    self.command_word(&self.settings.commands.merge)
                ),
            )
            .await?;
            return Ok(());
        }
        self.waiting
            .expect(
                &msg.sender_id,
                Expectation::MergeFirst {
                    prompt: prompt.to_string(),
                },
            )
            .await;
        out.send_text(
            chat,
            &format!(
                "Send the first image to merge within {}.",
                wait_window(self.settings.waits.merge_seconds)
            ),
        )
        .await?;
        Ok(())
    }

    pub(super) async fn cmd_reverse(
        &self,
        out: &dyn ChatOutbound,
        msg: &TextMessage,
    ) -> Result<()> {
        self.waiting
            .expect(&msg.sender_id, Expectation::ReversePrompt)
            .await;
        out.send_text(
            &msg.chat_id,
            &format!(
                "Send the image to reverse into a prompt within {}.",
                wait_window(self.settings.waits.reverse_seconds)
            ),
        )
        .await?;
        Ok(())
    }

    pub(super) async fn cmd_analysis(
        &self,
        out: &dyn ChatOutbound,
        msg: &TextMessage,
        question: &str,
    ) -> Result<()> {
        let question = if question.is_empty() {
            DEFAULT_ANALYSIS_QUESTION.to_string()
        } else {
            question.to_string()
        };
        self.waiting
            .expect(&msg.sender_id, Expectation::Analysis { question })
            .await;
        out.send_text(
            &msg.chat_id,
            &format!(
                "Send the image to analyze within {}.",
                wait_window(self.settings.waits.analysis_seconds)
            ),
        )
        .await?;
        Ok(())
    }

    pub(super) async fn cmd_follow_up(
        &self,
        out: &dyn ChatOutbound,
        msg: &TextMessage,
        question: &str,
    ) -> Result<()> {
        let chat = msg.chat_id.as_str();
        let user = msg.sender_id.as_str();

        let Some(bytes) = self.analysis_memory.get(user).await else {
            out.send_text(
                chat,
                "No recent image analysis found (or it expired). Use the analyze command first.",
            )
            .await?;
            return Ok(());
        };

        out.send_text(chat, MSG_WORKING_ANALYSIS).await?;
        let question = format!("{} Answer concisely.", question);
        match self.client.analyze(&bytes, &question).await? {
            Some(answer) => {
                // Each follow-up re-opens the follow-up window.
                self.analysis_memory.put(user, bytes).await;
                out.send_text(chat, &format!("{}{}", answer, self.follow_up_hint()))
                    .await?;
            }
            None => {
                out.send_text(chat, MSG_ANALYSIS_FAILED).await?;
            }
        }
        Ok(())
    }

    pub(super) async fn cmd_end_session(
        &self,
        out: &dyn ChatOutbound,
        msg: &TextMessage,
    ) -> Result<()> {
        let key = msg.sender_id.as_str();
        self.conversations.clear(key).await;
        self.images.forget(key).await;
        self.waiting.cancel(key).await;
        out.send_text(
            &msg.chat_id,
            "Session ended. Start a new one with any image command.",
        )
        .await?;
        Ok(())
    }

    pub(super) async fn process_reverse(
        &self,
        out: &dyn ChatOutbound,
        msg: &ImageMessage,
        bytes: &[u8],
    ) -> Result<()> {
        let chat = msg.chat_id.as_str();
        self.charge_points(&msg.sender_id, self.settings.points.reverse_cost, "reverse");

        let temp = self.images.write_temp(bytes, "reverse").await?;
        out.send_text(chat, MSG_WORKING_ANALYSIS).await?;

        match self.client.reverse_prompt(bytes).await? {
            Some(text) => {
                out.send_text(chat, &text).await?;
                cleanup_temp(&temp).await;
            }
            None => {
                out.send_text(chat, MSG_ANALYSIS_FAILED).await?;
            }
        }
        Ok(())
    }

    pub(super) async fn process_analysis(
        &self,
        out: &dyn ChatOutbound,
        msg: &ImageMessage,
        bytes: &[u8],
        question: &str,
    ) -> Result<()> {
        let chat = msg.chat_id.as_str();
        let user = msg.sender_id.as_str();
        self.charge_points(user, self.settings.points.analysis_cost, "analysis");

        let temp = self.images.write_temp(bytes, "analysis").await?;
        out.send_text(chat, MSG_WORKING_ANALYSIS).await?;

        match self.client.analyze(bytes, question).await? {
            Some(answer) => {
                // Remember the image so a follow-up can reuse it.
                self.analysis_memory.put(user, bytes.to_vec()).await;
                out.send_text(chat, &format!("{}{}", answer, self.follow_up_hint()))
                    .await?;
                cleanup_temp(&temp).await;
            }
            None => {
                out.send_text(chat, MSG_ANALYSIS_FAILED).await?;
            }
        }
        Ok(())
    }

    pub(super) async fn process_reference_edit(
        &self,
        out: &dyn ChatOutbound,
        msg: &ImageMessage,
        prompt: &str,
        bytes: &[u8],
    ) -> Result<()> {
        let chat = msg.chat_id.as_str();
        let user = msg.sender_id.as_str();
        let key = user;

        out.send_text(chat, "Working on the reference edit, one moment...")
            .await?;
        self.charge_points(user, self.settings.points.edit_cost, "reference edit");

        let conversation = self
            .conversations
            .get_or_reset(key, SessionType::Reference)
            .await;
        // The uploaded reference becomes the session's last image even if
        // the edit fails.
        self.images.persist(key, bytes, "reference").await?;

        let outcome = self
            .client
            .edit(prompt, bytes, &conversation.messages)
            .await?;
        match outcome {
            Outcome::Success { pairs, final_text } => {
                let Some(reply) = pairs.into_iter().last() else {
                    let text = final_text.unwrap_or_else(|| "unknown error".to_string());
                    out.send_text(chat, &format!("Reference edit failed: {}", localize_refusal(&text)))
                        .await?;
                    return Ok(());
                };

                let path = self.images.persist(key, &reply.bytes, "edited").await?;
                self.images.remember(key, user, &reply.bytes).await;

                if let Err(e) = deliver_image(out, chat, &reply.bytes, Some(&path)).await {
                    tracing::error!("[Engine] Reference edit delivery failed: {:#}", e);
                    out.send_text(chat, "The edited image could not be delivered, please retry.")
                        .await?;
                    return Ok(());
                }

                self.conversations
                    .append(
                        key,
                        Role::User,
                        vec![
                            MessagePart::Text(prompt.to_string()),
                            MessagePart::InlineImage {
                                mime_type: JPEG_MIME.to_string(),
                                data: bytes.to_vec(),
                            },
                        ],
                    )
                    .await;
                self.conversations
                    .append(
                        key,
                        Role::Model,
                        vec![MessagePart::InlineImage {
                            mime_type: JPEG_MIME.to_string(),
                            data: reply.bytes,
                        }],
                    )
                    .await;
            }
            other => {
                out.send_text(chat, &format!("Reference edit failed: {}", outcome_message(&other)))
                    .await?;
            }
        }
        Ok(())
    }

    pub(super) async fn process_merge(
        &self,
        out: &dyn ChatOutbound,
        msg: &ImageMessage,
        prompt: &str,
        first: Vec<u8>,
        second: Vec<u8>,
    ) -> Result<()> {
        let chat = msg.chat_id.as_str();
        let user = msg.sender_id.as_str();
        let key = user;

        out.send_text(chat, "Merging the images, one moment...").await?;
        self.charge_points(user, self.settings.points.edit_cost, "merge");

        // A merge always starts a fresh session, even over another merge.
        self.conversations.reset(key, SessionType::Merge).await;
        let fusion = if prompt.is_empty() {
            DEFAULT_MERGE_PROMPT.to_string()
        } else {
            format!("Merge these two images. {}", prompt)
        };
        self.conversations
            .append(
                key,
                Role::User,
                vec![
                    MessagePart::Text(fusion.clone()),
                    MessagePart::InlineImage {
                        mime_type: JPEG_MIME.to_string(),
                        data: first.clone(),
                    },
                    MessagePart::InlineImage {
                        mime_type: JPEG_MIME.to_string(),
                        data: second.clone(),
                    },
                ],
            )
            .await;

        let outcome = self.client.merge(&fusion, &first, &second).await?;
        match outcome {
            Outcome::Success { pairs, .. } => {
                let Some(reply) = pairs.into_iter().last() else {
                    out.send_text(chat, "Merge produced no image, please try different pictures.")
                        .await?;
                    return Ok(());
                };

                let path = self.images.persist(key, &reply.bytes, "merged").await?;
                self.images.remember(key, user, &reply.bytes).await;

                if let Err(e) = deliver_image(out, chat, &reply.bytes, Some(&path)).await {
                    tracing::error!("[Engine] Merged image delivery failed: {:#}", e);
                    out.send_text(chat, "The merged image could not be delivered, please retry.")
                        .await?;
                    return Ok(());
                }

                self.conversations
                    .append(
                        key,
                        Role::Model,
                        vec![MessagePart::InlineImage {
                            mime_type: JPEG_MIME.to_string(),
                            data: reply.bytes,
                        }],
                    )
                    .await;
            }
            other => {
                out.send_text(chat, &format!("Merge failed: {}", outcome_message(&other)))
                    .await?;
            }
        }
        Ok(())
    }

    /// Persist, deliver and caption a list of (image, text) pairs in
    /// order, skipping duplicate texts, then the closing text.
    async fn send_results(
        &self,
        out: &dyn ChatOutbound,
        chat: &str,
        key: &str,
        pairs: &[ImageReply],
        final_text: Option<&str>,
    ) -> Result<()> {
        let mut sent_texts: HashSet<&str> = HashSet::new();
        for (index, reply) in pairs.iter().enumerate() {
            let path = match self.images.persist(key, &reply.bytes, "generated").await {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!("[Engine] Could not persist image #{}: {:#}", index + 1, e);
                    None
                }
            };

            if let Err(e) = deliver_image(out, chat, &reply.bytes, path.as_deref()).await {
                tracing::error!("[Engine] Image #{} delivery failed: {:#}", index + 1, e);
                out.send_text(
                    chat,
                    &format!("Image #{} could not be delivered, please retry.", index + 1),
                )
                .await?;
                continue;
            }

            if !reply.caption.is_empty() && sent_texts.insert(reply.caption.as_str()) {
                out.send_text(chat, &reply.caption).await?;
            }
        }

        if let Some(text) = final_text {
            if !text.is_empty() && !sent_texts.contains(text) {
                out.send_text(chat, text).await?;
            }
        }

        if let Some(last) = pairs.last() {
            self.images.remember(key, key, &last.bytes).await;
        }
        Ok(())
    }

    /// Translate the prompt unless the user opted out. The translator
    /// itself fails open.
    async fn effective_prompt(&self, user: &str, prompt: &str) -> String {
        let enabled_for_user = {
            let prefs = self.translate_prefs.read().await;
            prefs.get(user).copied().unwrap_or(true)
        };
        if enabled_for_user {
            self.translator.translate(prompt).await
        } else {
            prompt.to_string()
        }
    }

    /// Credit-accounting hook; a real ledger plugs in here.
    fn charge_points(&self, user: &str, cost: u32, op: &str) {
        if self.settings.points.enable_points {
            tracing::info!("[Engine] Debiting {} points from '{}' for {}", cost, user, op);
        }
    }

    fn follow_up_hint(&self) -> String {
        format!(
            "\n\nSend \"{} <question>\" within {} to keep asking about this image.",
            self.command_word(&self.settings.commands.follow_up),
            wait_window(self.settings.waits.follow_up_seconds)
        )
    }

    fn command_word<'a>(&self, commands: &'a [String]) -> &'a str {
        commands.first().map(String::as_str).unwrap_or("")
    }
}

fn outcome_message(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success { .. } => "Done.".to_string(),
        Outcome::Refused(reason) => reason.user_message().to_string(),
        Outcome::Blocked { reason } => format!(
            "The prompt was rejected by the provider ({}). Please rephrase it.",
            reason
        ),
        Outcome::Empty => "The provider returned no content, please try again later.".to_string(),
        Outcome::Failed { reason } => format!(
            "Generation failed ({}). Please adjust the prompt and retry.",
            reason
        ),
    }
}

fn wait_window(seconds: u64) -> String {
    match seconds {
        60 => "1 minute".to_string(),
        s if s > 60 && s % 60 == 0 => format!("{} minutes", s / 60),
        s => format!("{} seconds", s),
    }
}

async fn cleanup_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("[Engine] Could not remove temp file {:?}: {}", path, e);
    }
}

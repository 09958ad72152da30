//! Request-orchestration engine.
//!
//! Owns every per-user state map (conversations, image cache, waiting
//! flows, analysis memory) and drives the command flows end to end:
//! command in, provider round trip, state reconciled, replies out.
//! Transport and storage collaborators stay stateless.
//!
//! Concurrency model: handlers are cooperative tasks on one logical
//! thread. Shared maps are re-read after every await; no lock is held
//! across a suspension point.

mod handlers;

use crate::chat::{ChatOutbound, ImageMessage, TextMessage};
use crate::config::Settings;
use crate::provider::{GeminiClient, ProviderError};
use crate::session::{
    Claim, ConversationManager, Expectation, FlowKind, ImageStore, WaitingRegistry,
};
use crate::store::{Clock, ExpiringStore, SystemClock};
use crate::translate::Translator;
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub struct Engine {
    settings: Settings,
    api_key: String,
    client: GeminiClient,
    translator: Translator,
    conversations: ConversationManager,
    images: ImageStore,
    waiting: WaitingRegistry,
    analysis_memory: ExpiringStore<Vec<u8>>,
    translate_prefs: RwLock<HashMap<String, bool>>,
}

impl Engine {
    pub fn new(
        settings: Settings,
        api_key: String,
        translate_api_key: Option<String>,
        temp_dir: PathBuf,
    ) -> Result<Self> {
        Self::with_clock(
            settings,
            api_key,
            translate_api_key,
            temp_dir,
            Arc::new(SystemClock),
        )
    }

    /// Construction with an injected clock, so tests can drive expiry
    /// without sleeping.
    pub fn with_clock(
        settings: Settings,
        api_key: String,
        translate_api_key: Option<String>,
        temp_dir: PathBuf,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = GeminiClient::from_settings(&settings, api_key.clone())?;
        let translator = Translator::new(
            settings.translate.api_base.clone(),
            translate_api_key,
            settings.translate.model.clone(),
            settings.translate.enable,
        );
        let conversations = ConversationManager::new(
            Duration::from_secs(settings.session.conversation_expire_seconds),
            settings.session.max_conversation_messages,
            clock.clone(),
        );
        let images = ImageStore::new(
            temp_dir,
            Duration::from_secs(settings.session.image_cache_timeout_seconds),
            Duration::from_secs(settings.session.temp_file_max_age_seconds),
            clock.clone(),
        )?;
        let waiting = WaitingRegistry::new(settings.waits.timeouts(), clock.clone());
        let analysis_memory =
            ExpiringStore::new(Duration::from_secs(settings.waits.follow_up_seconds), clock);

        Ok(Self {
            settings,
            api_key,
            client,
            translator,
            conversations,
            images,
            waiting,
            analysis_memory,
            translate_prefs: RwLock::new(HashMap::new()),
        })
    }

    /// Dispatch an inbound text message against the configured command
    /// lists. Returns `false` when the message was consumed (stop
    /// further dispatch), `true` to let it fall through.
    pub async fn handle_text(&self, out: &dyn ChatOutbound, msg: &TextMessage) -> bool {
        let content = msg.content.trim();
        let cmds = self.settings.commands.clone();
        let user = msg.sender_id.as_str();
        let chat = msg.chat_id.as_str();

        if exact_match(&cmds.image_reverse, content) {
            let result = self.cmd_reverse(out, msg).await;
            self.report(out, chat, "set up the reverse prompt", result).await;
            return false;
        }
        if let Some(question) = prefix_match(&cmds.image_analysis, content) {
            let result = self.cmd_analysis(out, msg, question).await;
            self.report(out, chat, "set up the image analysis", result).await;
            return false;
        }
        if let Some(question) = prefix_match(&cmds.follow_up, content) {
            let result = self.cmd_follow_up(out, msg, question).await;
            self.report(out, chat, "answer the follow-up", result).await;
            return false;
        }
        if exact_match(&cmds.translate_on, content) {
            self.set_translate_pref(user, true).await;
            let result = out
                .send_text(
                    chat,
                    "Prompt translation is on: prompts will be translated to English before \
                     generation.",
                )
                .await;
            self.report(out, chat, "switch translation on", result).await;
            return false;
        }
        if exact_match(&cmds.translate_off, content) {
            self.set_translate_pref(user, false).await;
            let result = out
                .send_text(
                    chat,
                    "Prompt translation is off: prompts will be sent exactly as written.",
                )
                .await;
            self.report(out, chat, "switch translation off", result).await;
            return false;
        }
        if exact_match(&cmds.exit_session, content) {
            let result = self.cmd_end_session(out, msg).await;
            self.report(out, chat, "end the session", result).await;
            return false;
        }
        if let Some(prompt) = prefix_match(&cmds.generate, content) {
            let result = self.cmd_generate(out, msg, prompt).await;
            self.report(out, chat, "generate the image", result).await;
            return false;
        }
        if let Some(prompt) = prefix_match(&cmds.edit, content) {
            let result = self.cmd_edit(out, msg, prompt).await;
            self.report(out, chat, "edit the image", result).await;
            return false;
        }
        if let Some(prompt) = prefix_match(&cmds.reference_edit, content) {
            let result = self.cmd_reference(out, msg, prompt).await;
            self.report(out, chat, "set up the reference edit", result).await;
            return false;
        }
        if let Some(prompt) = prefix_match(&cmds.merge, content) {
            let result = self.cmd_merge(out, msg, prompt).await;
            self.report(out, chat, "set up the merge", result).await;
            return false;
        }

        true
    }

    /// Route an inbound image: cache it, then complete whichever flow
    /// was waiting for it. Returns `false` when consumed by a pending
    /// flow, `true` when no flow claimed it.
    pub async fn handle_image(&self, out: &dyn ChatOutbound, msg: &ImageMessage) -> bool {
        let user = msg.sender_id.as_str();
        let key = user;
        let chat = msg.chat_id.as_str();

        // Arrival-time cleanup, cheap and idempotent.
        self.conversations.sweep().await;
        self.images.sweep().await;

        let bytes = match msg.image.load().await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                tracing::warn!("[Engine] Ignoring empty inbound image from '{}'", user);
                return true;
            }
            Err(e) => {
                tracing::warn!(
                    "[Engine] Could not read inbound image from '{}': {:#}",
                    user,
                    e
                );
                return true;
            }
        };

        self.images.remember(key, user, &bytes).await;

        let Some(claim) = self.waiting.claim(user).await else {
            tracing::debug!("[Engine] No pending flow for '{}', image cached only", user);
            return true;
        };

        match claim {
            Claim::Expired(kind) => {
                if let Err(e) = out.send_text(chat, expiry_message(kind)).await {
                    tracing::error!("[Engine] Could not send expiry notice: {:#}", e);
                }
            }
            Claim::Fulfilled(Expectation::ReversePrompt) => {
                let result = self.process_reverse(out, msg, &bytes).await;
                self.report(out, chat, "reverse the prompt", result).await;
            }
            Claim::Fulfilled(Expectation::Analysis { question }) => {
                let result = self.process_analysis(out, msg, &bytes, &question).await;
                self.report(out, chat, "analyze the image", result).await;
            }
            Claim::Fulfilled(Expectation::ReferenceEdit { prompt }) => {
                let result = self.process_reference_edit(out, msg, &prompt, &bytes).await;
                self.report(out, chat, "apply the reference edit", result).await;
            }
            Claim::Fulfilled(Expectation::MergeFirst { prompt }) => {
                self.waiting
                    .expect(
                        user,
                        Expectation::MergeSecond {
                            prompt,
                            first_image: bytes,
                        },
                    )
                    .await;
                if let Err(e) = out
                    .send_text(chat, "Got the first image, now send the second one.")
                    .await
                {
                    tracing::error!("[Engine] Could not acknowledge first merge image: {:#}", e);
                }
            }
            Claim::Fulfilled(Expectation::MergeSecond {
                prompt,
                first_image,
            }) => {
                let result = self
                    .process_merge(out, msg, &prompt, first_image, bytes)
                    .await;
                self.report(out, chat, "merge the images", result).await;
            }
        }
        false
    }

    /// Periodic maintenance: TTL sweeps over every map plus temp-file
    /// reclamation. Idempotent; driven by an external timer.
    pub async fn sweep(&self) {
        let conversations = self.conversations.sweep().await;
        let cached = self.images.sweep().await;
        let waiting = self.waiting.sweep().await;
        let memories = self.analysis_memory.sweep().await;
        if conversations + cached + waiting + memories > 0 {
            tracing::debug!(
                "[Engine] Sweep removed {} conversations, {} cached images, {} waits, {} memories",
                conversations,
                cached,
                waiting,
                memories
            );
        }
        self.images.sweep_temp_files().await;
    }

    async fn set_translate_pref(&self, user: &str, enabled: bool) {
        let mut prefs = self.translate_prefs.write().await;
        prefs.insert(user.to_string(), enabled);
    }

    /// Convert a handler failure into one user-facing chat message.
    /// Nothing propagates past here; the process never crashes on a
    /// command.
    async fn report(&self, out: &dyn ChatOutbound, chat: &str, op: &str, result: Result<()>) {
        if let Err(err) = result {
            tracing::error!("[Engine] Failed to {}: {:#}", op, err);
            let text = match err.downcast_ref::<ProviderError>() {
                Some(provider_err) => provider_err.user_message(),
                None => format!("Failed to {}, please try again later.", op),
            };
            if let Err(send_err) = out.send_text(chat, &text).await {
                tracing::error!(
                    "[Engine] Could not report failure to '{}': {:#}",
                    chat,
                    send_err
                );
            }
        }
    }
}

fn exact_match(commands: &[String], content: &str) -> bool {
    commands.iter().any(|c| c == content)
}

fn prefix_match<'a>(commands: &[String], content: &'a str) -> Option<&'a str> {
    commands
        .iter()
        .find_map(|c| content.strip_prefix(c.as_str()))
        .map(str::trim)
}

fn expiry_message(kind: FlowKind) -> &'static str {
    match kind {
        FlowKind::Reverse => "The reverse-prompt image arrived too late, please send the command again.",
        FlowKind::Analysis => "The analysis image arrived too late, please send the command again.",
        FlowKind::ReferenceEdit => "The reference image arrived too late, please send the command again.",
        FlowKind::Merge => "The merge images arrived too late, please start the merge again.",
    }
}

//! Conversation Manager
//!
//! Information Hiding:
//! - History trimming policy internalized
//! - Session-type transitions decided here, not by command handlers
//! - Expiry delegated to the shared expiring store

use crate::store::{Clock, ExpiringStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Interaction mode a session is currently in. A command implying a
/// different mode hard-resets the session content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Generate,
    Edit,
    Reference,
    Merge,
    Analysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// Role name used on the provider wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One fragment of a conversation message. Image fragments are either
/// raw bytes or a reference to a temp file resolved at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessagePart {
    Text(String),
    InlineImage { mime_type: String, data: Vec<u8> },
    ImageRef(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub session_type: SessionType,
    pub messages: Vec<ChatMessage>,
}

impl Conversation {
    fn new(session_type: SessionType) -> Self {
        Self {
            conversation_id: String::new(),
            session_type,
            messages: Vec::new(),
        }
    }
}

/// Per-user conversation histories with a fixed message cap and idle
/// expiry. Appending refreshes the idle timer.
pub struct ConversationManager {
    store: ExpiringStore<Conversation>,
    max_messages: usize,
}

impl ConversationManager {
    pub fn new(expiry: Duration, max_messages: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: ExpiringStore::new(expiry, clock),
            max_messages,
        }
    }

    /// Returns the stored conversation when its type already matches the
    /// implied one; otherwise replaces it with a fresh, empty conversation
    /// of the implied type. The transition into Edit keeps the carried-over
    /// conversation id; content is always reset on a type change.
    pub async fn get_or_reset(&self, key: &str, implied: SessionType) -> Conversation {
        let result = self
            .store
            .update(key, |current| match current {
                Some(conv) if conv.session_type == implied => Some(conv),
                current => {
                    let mut fresh = Conversation::new(implied);
                    if implied == SessionType::Edit {
                        if let Some(prev) = current {
                            fresh.conversation_id = prev.conversation_id;
                        }
                    }
                    tracing::info!(
                        "[ConversationManager] Session '{}' reset to type {:?}",
                        key,
                        implied
                    );
                    Some(fresh)
                }
            })
            .await;
        // update() with a Some-returning closure always stores a value
        result.unwrap_or_else(|| Conversation::new(implied))
    }

    /// Unconditionally replace the session with a fresh conversation of
    /// the given type, even when the type already matches.
    pub async fn reset(&self, key: &str, session_type: SessionType) {
        self.store.put(key, Conversation::new(session_type)).await;
        tracing::info!(
            "[ConversationManager] Session '{}' restarted as {:?}",
            key,
            session_type
        );
    }

    /// Push a message, refresh the idle timer and trim the history to the
    /// most recent `max_messages`. Returns the post-trim history.
    pub async fn append(
        &self,
        key: &str,
        role: Role,
        parts: Vec<MessagePart>,
    ) -> Vec<ChatMessage> {
        let max = self.max_messages;
        let updated = self
            .store
            .update(key, move |current| {
                let mut conv = current.unwrap_or_else(|| Conversation::new(SessionType::Generate));
                conv.messages.push(ChatMessage { role, parts });
                if conv.messages.len() > max {
                    let excess = conv.messages.len() - max;
                    conv.messages.drain(..excess);
                    tracing::info!(
                        "[ConversationManager] Session '{}' trimmed to the {} most recent messages",
                        key,
                        max
                    );
                }
                Some(conv)
            })
            .await;
        updated.map(|c| c.messages).unwrap_or_default()
    }

    pub async fn history(&self, key: &str) -> Vec<ChatMessage> {
        self.store
            .get(key)
            .await
            .map(|c| c.messages)
            .unwrap_or_default()
    }

    /// Remove the conversation, its type tag and its idle timer in one
    /// store operation.
    pub async fn clear(&self, key: &str) {
        self.store.remove(key).await;
        tracing::info!("[ConversationManager] Cleared session '{}'", key);
    }

    pub async fn sweep(&self) -> usize {
        self.store.sweep().await
    }
}

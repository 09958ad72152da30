//! Imago - conversational image generation over a multimodal API
//!
//! This library sits between a chat transport and the provider's
//! `generateContent` endpoint: it tracks per-user sessions and waiting
//! flows, assembles multimodal payloads under a byte-size ceiling,
//! executes calls with bounded retries, and classifies the provider's
//! response shapes back into session state and chat replies.

pub mod chat;
mod config;
pub mod engine;
pub mod imaging;
pub mod provider;
pub mod session;
pub mod store;
pub mod translate;
pub mod utils;

pub mod cli;

pub use config::Settings;
pub use engine::Engine;

// Re-export the transport seam for embedders
pub use chat::{ChatOutbound, ConsoleOutbound, ImageMessage, IncomingImage, TextMessage};

// Re-export the classifier outcome for embedders inspecting results
pub use provider::{Outcome, ProviderError};

// Re-export the injectable clocks used by tests and embedders
pub use store::{Clock, ExpiringStore, ManualClock, SystemClock};

//! Provider integration: payload assembly, resilient HTTP transport
//! and response classification for the `generateContent` endpoint.

pub mod client;
pub mod request;
pub mod response;
pub mod transport;
pub mod wire;

pub use client::GeminiClient;
pub use request::{BuiltRequest, CurrentTurn, RequestBuilder};
pub use response::{classify, localize_refusal, ImageReply, Outcome, RefusalReason};
pub use transport::{RetryPolicy, Transport};

use thiserror::Error;

/// Transport-level failure taxonomy. Everything here is terminal for
/// the call that produced it; retrying already happened inside the
/// transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("provider overloaded, gave up after {attempts} attempts")]
    Overloaded { attempts: u32 },

    #[error("network failure after {attempts} attempts: {source}")]
    Network {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("{hint} (HTTP {status})")]
    Status {
        status: u16,
        hint: String,
        body: String,
    },

    #[error("provider returned an empty response body")]
    EmptyBody,

    #[error("failed to decode provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    /// The single chat message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            TransportError::Overloaded { .. } | TransportError::Network { .. } => {
                "The image service is overloaded right now, please try again later.".to_string()
            }
            TransportError::Status { status: 429, .. } => {
                "Requests are too frequent, please wait a moment before retrying.".to_string()
            }
            TransportError::Status { hint, status, .. } => {
                format!("The request was rejected: {} (HTTP {}).", hint, status)
            }
            TransportError::EmptyBody | TransportError::Decode(_) => {
                "The image service returned an unusable response, please try again later."
                    .to_string()
            }
        }
    }
}

/// Failure of a whole provider operation: either the request could not
/// be assembled, or the transport gave up.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to assemble request: {0}")]
    Build(#[source] anyhow::Error),
}

impl ProviderError {
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::Transport(e) => e.user_message(),
            ProviderError::Build(_) => {
                "Could not prepare the request, please try again.".to_string()
            }
        }
    }
}

//! Chat transport seam.
//!
//! Information Hiding:
//! - Delivery backend hidden behind the outbound trait
//! - Inbound image normalization (path vs inline base64) internalized
//! - Delivery retries modeled as an ordered fallback chain, not nested
//!   error handlers

pub mod console;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::{Path, PathBuf};

pub use console::ConsoleOutbound;

/// Outbound side of the chat transport. Implementations deliver to a
/// real channel; tests capture.
#[async_trait]
pub trait ChatOutbound: Send + Sync {
    async fn send_text(&self, target: &str, text: &str) -> Result<()>;

    /// Deliver raw image bytes.
    async fn send_image(&self, target: &str, bytes: &[u8]) -> Result<()>;

    /// Deliver an image the transport reads from disk itself. Default
    /// falls back to reading the file and sending bytes.
    async fn send_image_file(&self, target: &str, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image file {:?}", path))?;
        self.send_image(target, &bytes).await
    }
}

/// Ordered delivery fallback: bytes, then re-read-from-disk bytes, then
/// the path itself. Each failed attempt is logged; the error of the
/// last attempt is returned when all fail.
pub async fn deliver_image(
    out: &dyn ChatOutbound,
    target: &str,
    bytes: &[u8],
    fallback_path: Option<&Path>,
) -> Result<()> {
    let mut last_error = match out.send_image(target, bytes).await {
        Ok(()) => return Ok(()),
        Err(e) => {
            tracing::warn!("[Chat] Sending image bytes failed: {:#}", e);
            e
        }
    };

    if let Some(path) = fallback_path {
        match tokio::fs::read(path).await {
            Ok(reread) => match out.send_image(target, &reread).await {
                Ok(()) => {
                    tracing::info!("[Chat] Delivered image after re-reading {:?}", path);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("[Chat] Sending re-read bytes failed: {:#}", e);
                    last_error = e;
                }
            },
            Err(e) => {
                tracing::warn!("[Chat] Re-reading {:?} failed: {}", path, e);
            }
        }

        match out.send_image_file(target, path).await {
            Ok(()) => {
                tracing::info!("[Chat] Delivered image by path {:?}", path);
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("[Chat] Sending image by path failed: {:#}", e);
                last_error = e;
            }
        }
    }

    Err(last_error.context("All image delivery attempts failed"))
}

/// Inbound text message from the transport.
#[derive(Debug, Clone)]
pub struct TextMessage {
    /// Where replies go (room or direct chat).
    pub chat_id: String,
    /// Stable identity of the human sender; keys all session state.
    pub sender_id: String,
    pub content: String,
}

/// Inbound image message, delivered either as a filesystem path or as
/// inline base64 content.
#[derive(Debug, Clone)]
pub struct ImageMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub image: IncomingImage,
}

#[derive(Debug, Clone)]
pub enum IncomingImage {
    Path(PathBuf),
    Base64(String),
}

impl IncomingImage {
    /// Normalize to raw bytes before any processing.
    pub async fn load(&self) -> Result<Vec<u8>> {
        match self {
            IncomingImage::Path(path) => tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read inbound image {:?}", path)),
            IncomingImage::Base64(data) => BASE64
                .decode(data.as_bytes())
                .context("Failed to decode inbound base64 image"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fails the first N byte sends, then succeeds.
    struct FlakyOutbound {
        failures: AtomicUsize,
        byte_sends: AtomicUsize,
        file_sends: AtomicUsize,
    }

    impl FlakyOutbound {
        fn failing(n: usize) -> Self {
            Self {
                failures: AtomicUsize::new(n),
                byte_sends: AtomicUsize::new(0),
                file_sends: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatOutbound for FlakyOutbound {
        async fn send_text(&self, _target: &str, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn send_image(&self, _target: &str, _bytes: &[u8]) -> Result<()> {
            self.byte_sends.fetch_add(1, Ordering::SeqCst);
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok()
            {
                anyhow::bail!("channel hiccup");
            }
            Ok(())
        }

        async fn send_image_file(&self, _target: &str, _path: &Path) -> Result<()> {
            self.file_sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_deliver_image_first_attempt() {
        let out = FlakyOutbound::failing(0);
        deliver_image(&out, "chat", b"img", None).await.unwrap();
        assert_eq!(out.byte_sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deliver_image_falls_back_to_reread_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.png");
        std::fs::write(&path, b"img").unwrap();

        let out = FlakyOutbound::failing(1);
        deliver_image(&out, "chat", b"img", Some(&path))
            .await
            .unwrap();
        assert_eq!(out.byte_sends.load(Ordering::SeqCst), 2);
        assert_eq!(out.file_sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deliver_image_falls_back_to_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.png");
        std::fs::write(&path, b"img").unwrap();

        let out = FlakyOutbound::failing(2);
        deliver_image(&out, "chat", b"img", Some(&path))
            .await
            .unwrap();
        assert_eq!(out.byte_sends.load(Ordering::SeqCst), 2);
        assert_eq!(out.file_sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deliver_image_fails_without_fallback_path() {
        let out = FlakyOutbound::failing(5);
        assert!(deliver_image(&out, "chat", b"img", None).await.is_err());
        assert_eq!(out.byte_sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_incoming_base64_normalizes_to_bytes() {
        let encoded = BASE64.encode(b"jpeg-bytes");
        let image = IncomingImage::Base64(encoded);
        assert_eq!(image.load().await.unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_incoming_path_normalizes_to_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.png");
        std::fs::write(&path, b"file-bytes").unwrap();

        let image = IncomingImage::Path(path);
        assert_eq!(image.load().await.unwrap(), b"file-bytes");
    }
}

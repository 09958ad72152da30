//! Console transport used by the CLI binary: text goes to stdout,
//! images land in an outbox directory and their path is printed.

use super::ChatOutbound;
use crate::utils;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct ConsoleOutbound {
    out_dir: PathBuf,
}

impl ConsoleOutbound {
    pub fn new(out_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create outbox directory {:?}", out_dir))?;
        Ok(Self { out_dir })
    }
}

#[async_trait]
impl ChatOutbound for ConsoleOutbound {
    async fn send_text(&self, target: &str, text: &str) -> Result<()> {
        utils::print_info(&format!("[{}] {}", target, text));
        Ok(())
    }

    async fn send_image(&self, target: &str, bytes: &[u8]) -> Result<()> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let path = self.out_dir.join(format!("reply_{}.png", stamp));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write outbox image {:?}", path))?;
        utils::print_success(&format!("[{}] image -> {}", target, path.display()));
        Ok(())
    }

    async fn send_image_file(&self, target: &str, path: &Path) -> Result<()> {
        utils::print_success(&format!("[{}] image -> {}", target, path.display()));
        Ok(())
    }
}

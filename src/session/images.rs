//! Image Cache & Handoff
//!
//! Information Hiding:
//! - Two-tier layout (TTL cache + durable temp file) hidden behind
//!   remember/recall
//! - Temp-file naming and reclamation internalized

use crate::store::{Clock, ExpiringStore};
use anyhow::{Context, Result};
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::RwLock;

/// Binds a session key to its most recent raw image bytes so a later
/// edit command can pick them up without a re-upload. Bytes live in a
/// TTL cache; the most recent persisted image also survives on disk and
/// refills the cache on a miss.
pub struct ImageStore {
    cache: ExpiringStore<Vec<u8>>,
    last_paths: RwLock<HashMap<String, PathBuf>>,
    temp_dir: PathBuf,
    temp_max_age: Duration,
}

impl ImageStore {
    pub fn new(
        temp_dir: PathBuf,
        cache_ttl: Duration,
        temp_max_age: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&temp_dir)
            .with_context(|| format!("Failed to create temp directory {:?}", temp_dir))?;
        Ok(Self {
            cache: ExpiringStore::new(cache_ttl, clock),
            last_paths: RwLock::new(HashMap::new()),
            temp_dir,
            temp_max_age,
        })
    }

    /// Cache the bytes under the session key, and additionally under the
    /// raw user id when the two differ (group-chat sender vs room).
    pub async fn remember(&self, key: &str, user_id: &str, bytes: &[u8]) {
        self.cache.put(key, bytes.to_vec()).await;
        if user_id != key {
            self.cache.put(user_id, bytes.to_vec()).await;
        }
        tracing::debug!(
            "[ImageStore] Cached {} bytes for session '{}'",
            bytes.len(),
            key
        );
    }

    /// Cache first; on a miss, fall back to the durable file and refill
    /// the cache with its contents before returning.
    pub async fn recall(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.cache.get(key).await {
            tracing::debug!(
                "[ImageStore] Cache hit for session '{}' ({} bytes)",
                key,
                bytes.len()
            );
            return Some(bytes);
        }

        let path = {
            let paths = self.last_paths.read().await;
            paths.get(key).cloned()
        }?;

        match fs::read(&path).await {
            Ok(bytes) => {
                self.cache.put(key, bytes.clone()).await;
                tracing::info!(
                    "[ImageStore] Refilled cache for session '{}' from {:?}",
                    key,
                    path
                );
                Some(bytes)
            }
            Err(e) => {
                tracing::warn!(
                    "[ImageStore] Durable image for session '{}' unreadable at {:?}: {}",
                    key,
                    path,
                    e
                );
                None
            }
        }
    }

    /// Write the bytes to a uniquely-named temp file and record it as the
    /// session's last image. Filenames never collide, so nothing is ever
    /// overwritten or locked.
    pub async fn persist(&self, key: &str, bytes: &[u8], prefix: &str) -> Result<PathBuf> {
        let path = self.write_temp(bytes, prefix).await?;
        let mut paths = self.last_paths.write().await;
        paths.insert(key.to_string(), path.clone());
        Ok(path)
    }

    /// Write a temp file without binding it to any session.
    pub async fn write_temp(&self, bytes: &[u8], prefix: &str) -> Result<PathBuf> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let filename = format!("{}_{}_{}.png", prefix, timestamp, random_suffix(8));
        let path = self.temp_dir.join(filename);
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write image file {:?}", path))?;
        tracing::debug!("[ImageStore] Wrote {} bytes to {:?}", bytes.len(), path);
        Ok(path)
    }

    /// Drop both tiers for a session key.
    pub async fn forget(&self, key: &str) {
        self.cache.remove(key).await;
        let mut paths = self.last_paths.write().await;
        paths.remove(key);
    }

    pub async fn sweep(&self) -> usize {
        self.cache.sweep().await
    }

    /// Delete temp files older than the configured age. Failures are
    /// logged and swallowed; reclamation never fails a primary operation.
    pub async fn sweep_temp_files(&self) -> usize {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    "[ImageStore] Cannot scan temp directory {:?}: {}",
                    self.temp_dir,
                    e
                );
                return 0;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .unwrap_or_default();
            if age > self.temp_max_age {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!("[ImageStore] Failed to remove {:?}: {}", path, e);
                    }
                }
            }
        }

        if removed > 0 {
            tracing::info!("[ImageStore] Removed {} stale temp files", removed);
        }
        removed
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

fn random_suffix(len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

//! Expiring Key-Value Store
//!
//! Information Hiding:
//! - HashMap storage structure hidden from users
//! - Expiry bookkeeping hidden behind get/put/sweep
//! - Time source injected so tests never sleep

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Injectable time source. Production code uses [`SystemClock`];
/// tests drive [`ManualClock`] to simulate expiry without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Test clock that only moves when told to.
pub struct ManualClock {
    start: Instant,
    offset: std::sync::Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: std::sync::Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().expect("clock offset lock");
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().expect("clock offset lock")
    }
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// TTL-backed map. Every collection in the engine (conversations, image
/// cache, analysis memory) is one of these with its own fixed TTL.
///
/// Expiry is lazy: `get` treats stale entries as absent and evicts them,
/// so correctness never depends on the periodic `sweep`.
pub struct ExpiringStore<V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V: Clone + Send + Sync> ExpiringStore<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace. Replacing refreshes the entry's expiry.
    pub async fn put(&self, key: &str, value: V) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                stored_at: self.clock.now(),
            },
        );
    }

    /// Returns the live value, or `None` if the key is missing or its TTL
    /// has elapsed. Stale entries are evicted on the way out.
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if !self.is_expired(entry) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                tracing::debug!("[ExpiringStore] Lazily evicted expired entry '{}'", key);
                None
            }
            None => None,
        }
    }

    pub async fn remove(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.write().await;
        entries.remove(key).map(|e| e.value)
    }

    /// Read-modify-write under one lock acquisition, so interleaved tasks
    /// never observe a half-applied update. The closure receives `None`
    /// when the key is missing or expired; returning `None` removes the
    /// entry, returning `Some` stores it with a refreshed expiry.
    pub async fn update<F>(&self, key: &str, f: F) -> Option<V>
    where
        F: FnOnce(Option<V>) -> Option<V>,
    {
        let mut entries = self.entries.write().await;
        let current = match entries.get(key) {
            Some(entry) if !self.is_expired(entry) => Some(entry.value.clone()),
            _ => None,
        };
        match f(current) {
            Some(value) => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.clone(),
                        stored_at: self.clock.now(),
                    },
                );
                Some(value)
            }
            None => {
                entries.remove(key);
                None
            }
        }
    }

    /// Drop every expired entry. Idempotent; safe to call at any time.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired_at(entry, self.clock.now()));
        before - entries.len()
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        self.is_expired_at(entry, self.clock.now())
    }

    fn is_expired_at(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.duration_since(entry.stored_at) > self.ttl
    }
}

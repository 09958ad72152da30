//! Waiting-State Machines
//!
//! One pending expectation per user: recording that the next qualifying
//! image from that user belongs to a specific flow. Setting a new
//! expectation supersedes any other, so a user can never be waiting in
//! two flows at once. Timeouts are checked lazily when the image
//! arrives; abandoned entries are reclaimed by the periodic sweep.

use crate::store::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// What the next inbound image from a user should complete.
#[derive(Debug, Clone)]
pub enum Expectation {
    ReversePrompt,
    Analysis { question: String },
    ReferenceEdit { prompt: String },
    MergeFirst { prompt: String },
    MergeSecond { prompt: String, first_image: Vec<u8> },
}

impl Expectation {
    pub fn kind(&self) -> FlowKind {
        match self {
            Expectation::ReversePrompt => FlowKind::Reverse,
            Expectation::Analysis { .. } => FlowKind::Analysis,
            Expectation::ReferenceEdit { .. } => FlowKind::ReferenceEdit,
            Expectation::MergeFirst { .. } | Expectation::MergeSecond { .. } => FlowKind::Merge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Reverse,
    Analysis,
    ReferenceEdit,
    Merge,
}

/// Per-flow wait timeouts.
#[derive(Debug, Clone)]
pub struct WaitTimeouts {
    pub reverse: Duration,
    pub analysis: Duration,
    pub reference: Duration,
    pub merge: Duration,
}

/// Outcome of claiming a pending expectation when an image arrives.
#[derive(Debug)]
pub enum Claim {
    Fulfilled(Expectation),
    Expired(FlowKind),
}

struct Pending {
    expectation: Expectation,
    started_at: Instant,
}

pub struct WaitingRegistry {
    timeouts: WaitTimeouts,
    clock: Arc<dyn Clock>,
    pending: RwLock<HashMap<String, Pending>>,
}

impl WaitingRegistry {
    pub fn new(timeouts: WaitTimeouts, clock: Arc<dyn Clock>) -> Self {
        Self {
            timeouts,
            clock,
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Record an expectation for the user, superseding any previous one.
    pub async fn expect(&self, user: &str, expectation: Expectation) {
        let mut pending = self.pending.write().await;
        if let Some(previous) = pending.get(user) {
            tracing::info!(
                "[WaitingRegistry] User '{}' superseded pending {:?} flow",
                user,
                previous.expectation.kind()
            );
        }
        pending.insert(
            user.to_string(),
            Pending {
                expectation,
                started_at: self.clock.now(),
            },
        );
    }

    /// Remove and return the user's pending expectation, checking its
    /// timeout at this moment. Expired entries are reported once and
    /// discarded either way.
    pub async fn claim(&self, user: &str) -> Option<Claim> {
        let mut pending = self.pending.write().await;
        let entry = pending.remove(user)?;
        let kind = entry.expectation.kind();
        let elapsed = self.clock.now().duration_since(entry.started_at);
        if elapsed > self.timeout_for(kind) {
            tracing::warn!(
                "[WaitingRegistry] User '{}' {:?} wait expired after {:?}",
                user,
                kind,
                elapsed
            );
            Some(Claim::Expired(kind))
        } else {
            Some(Claim::Fulfilled(entry.expectation))
        }
    }

    pub async fn cancel(&self, user: &str) {
        let mut pending = self.pending.write().await;
        pending.remove(user);
    }

    /// Reclaim entries whose triggering image never arrived.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, entry| {
            now.duration_since(entry.started_at) <= self.timeout_for(entry.expectation.kind())
        });
        before - pending.len()
    }

    fn timeout_for(&self, kind: FlowKind) -> Duration {
        match kind {
            FlowKind::Reverse => self.timeouts.reverse,
            FlowKind::Analysis => self.timeouts.analysis,
            FlowKind::ReferenceEdit => self.timeouts.reference,
            FlowKind::Merge => self.timeouts.merge,
        }
    }
}

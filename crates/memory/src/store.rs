//! Conversation store: bounded, per-conversation turn history.
//!
//! All reads are served from memory. Every mutation goes through one writer
//! lock that covers both the in-memory change and the following save, so
//! saves reach the backend in the same order as the mutations they reflect
//! and two appends can never interleave.
//!
//! A failed save is logged and counted. The in-memory state keeps the
//! mutation either way, and the next successful save catches the document up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::Utc;
use replyd_core::memory::{HistoryBackend, HistoryDocument};
use replyd_core::message::{Role, Turn};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of one TTL sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub turns_removed: usize,
    pub conversations_removed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.turns_removed == 0 && self.conversations_removed == 0
    }
}

pub struct ConversationStore {
    conversations: RwLock<HistoryDocument>,
    writer: Mutex<()>,
    backend: Arc<dyn HistoryBackend>,
    max_history: usize,
    ttl: Option<Duration>,
    failures: AtomicU64,
    last_error: std::sync::Mutex<Option<String>>,
}

impl ConversationStore {
    /// Load the persisted document and keep at most `max_history` turns
    /// per conversation.
    ///
    /// An unreadable document is logged and the store starts empty.
    pub async fn load(backend: Arc<dyn HistoryBackend>, max_history: usize) -> Self {
        let max_history = max_history.max(1);
        let store = Self {
            conversations: RwLock::new(HistoryDocument::new()),
            writer: Mutex::new(()),
            backend,
            max_history,
            ttl: None,
            failures: AtomicU64::new(0),
            last_error: std::sync::Mutex::new(None),
        };

        match store.backend.load().await {
            Ok(mut document) => {
                document.retain(|_, turns| {
                    trim(turns, max_history);
                    !turns.is_empty()
                });
                info!(
                    backend = store.backend.name(),
                    conversations = document.len(),
                    "Conversation history loaded"
                );
                *store.conversations.write().await = document;
            }
            Err(e) => {
                warn!(backend = store.backend.name(), error = %e, "Could not load conversation history, starting empty");
                store.record_failure(e.to_string());
            }
        }

        store
    }

    /// Drop turns older than `ttl` on each [`sweep_expired`](Self::sweep_expired).
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Turns for `id`, oldest first. Unknown ids have an empty history.
    pub async fn get_history(&self, id: &str) -> Vec<Turn> {
        self.conversations
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Append one turn stamped with the current time.
    pub async fn append(&self, id: &str, role: Role, content: impl Into<String>) {
        let turn = Turn::new(role, content);
        self.append_turns(id, [turn]).await;
    }

    /// Append a user turn and the assistant reply to it as one write.
    pub async fn append_exchange(&self, id: &str, user: impl Into<String>, assistant: impl Into<String>) {
        let user = Turn::new(Role::User, user);
        let assistant = Turn::new(Role::Assistant, assistant);
        self.append_turns(id, [user, assistant]).await;
    }

    async fn append_turns<const N: usize>(&self, id: &str, turns: [Turn; N]) {
        let max_history = self.max_history;
        let len = self
            .mutate(|conversations| {
                let history = conversations.entry(id.to_string()).or_default();
                history.extend(turns);
                trim(history, max_history);
                Some(history.len())
            })
            .await
            .unwrap_or_default();
        debug!(conversation = %id, added = N, len, "Turns appended");
    }

    /// Remove all history for `id`. Returns whether anything was removed.
    pub async fn clear(&self, id: &str) -> bool {
        let removed = self
            .mutate(|conversations| conversations.remove(id).map(|_| ()))
            .await
            .is_some();
        if removed {
            info!(conversation = %id, "Conversation history cleared");
        }
        removed
    }

    /// Drop turns older than the TTL and any conversation left empty.
    ///
    /// Without a TTL this is a no-op.
    pub async fn sweep_expired(&self) -> SweepReport {
        let Some(ttl) = self.ttl else {
            return SweepReport::default();
        };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return SweepReport::default();
        };
        let cutoff = Utc::now() - ttl;

        let report = self
            .mutate(|conversations| {
                let mut report = SweepReport::default();
                conversations.retain(|_, turns| {
                    let before = turns.len();
                    turns.retain(|t| t.timestamp >= cutoff);
                    report.turns_removed += before - turns.len();
                    if turns.is_empty() {
                        report.conversations_removed += 1;
                        false
                    } else {
                        true
                    }
                });
                (!report.is_empty()).then_some(report)
            })
            .await
            .unwrap_or_default();

        if !report.is_empty() {
            info!(
                turns = report.turns_removed,
                conversations = report.conversations_removed,
                "Expired history swept"
            );
        }
        report
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until the
    /// returned handle is aborted. Returns `None` when no TTL is configured.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if self.ttl.is_none() {
            return None;
        }
        let store = Arc::clone(self);
        let period = interval.max(Duration::from_secs(1));

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.sweep_expired().await;
            }
        }))
    }

    pub async fn conversation_ids(&self) -> Vec<String> {
        self.conversations.read().await.keys().cloned().collect()
    }

    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }

    /// Number of saves (and loads) that have failed since startup.
    pub fn persistence_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn last_persistence_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `change` under the writer lock and persist when it reports a
    /// change by returning `Some`.
    async fn mutate<R>(&self, change: impl FnOnce(&mut HistoryDocument) -> Option<R>) -> Option<R> {
        let _writer = self.writer.lock().await;

        let (result, snapshot) = {
            let mut conversations = self.conversations.write().await;
            let result = change(&mut conversations);
            let snapshot = result.as_ref().map(|_| conversations.clone());
            (result, snapshot)
        };

        if let Some(snapshot) = snapshot {
            if let Err(e) = self.backend.save(&snapshot).await {
                warn!(backend = self.backend.name(), error = %e, "Failed to persist conversation history");
                self.record_failure(e.to_string());
            }
        }

        result
    }

    fn record_failure(&self, error: String) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }
}

/// Drop the oldest turns until at most `max` remain.
fn trim(turns: &mut Vec<Turn>, max: usize) {
    if turns.len() > max {
        let excess = turns.len() - max;
        turns.drain(..excess);
    }
}

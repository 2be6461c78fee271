//! In-memory backend, useful for testing and ephemeral sessions.

use async_trait::async_trait;
use replyd_core::error::StoreError;
use replyd_core::memory::{HistoryBackend, HistoryDocument};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Keeps the last saved document in memory.
/// Useful for testing and sessions where persistence isn't needed.
#[derive(Default)]
pub struct InMemoryBackend {
    document: Mutex<HistoryDocument>,
    saves: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document, as if it had been saved earlier.
    pub fn with_document(document: HistoryDocument) -> Self {
        Self {
            document: Mutex::new(document),
            saves: AtomicUsize::new(0),
        }
    }

    /// The most recently saved document.
    pub async fn snapshot(&self) -> HistoryDocument {
        self.document.lock().await.clone()
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self) -> Result<HistoryDocument, StoreError> {
        Ok(self.document.lock().await.clone())
    }

    async fn save(&self, document: &HistoryDocument) -> Result<(), StoreError> {
        *self.document.lock().await = document.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replyd_core::message::{Role, Turn};

    #[tokio::test]
    async fn save_replaces_document() {
        let backend = InMemoryBackend::new();
        assert!(backend.load().await.unwrap().is_empty());

        let mut doc = HistoryDocument::new();
        doc.insert("a".into(), vec![Turn::new(Role::User, "one")]);
        backend.save(&doc).await.unwrap();

        doc.clear();
        doc.insert("b".into(), vec![Turn::new(Role::User, "two")]);
        backend.save(&doc).await.unwrap();

        let loaded = backend.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("b"));
        assert_eq!(backend.save_count(), 2);
    }
}

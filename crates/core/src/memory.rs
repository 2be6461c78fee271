//! History persistence trait.
//!
//! The conversation store keeps everything in memory and hands a full
//! snapshot to a [`HistoryBackend`] after every mutation. Backends are dumb:
//! they load and save one document, nothing more.

use async_trait::async_trait;
use std::collections::BTreeMap;
use crate::error::StoreError;
use crate::message::Turn;

/// The persisted shape: conversation id → ordered turns, oldest first.
///
/// A `BTreeMap` keeps the on-disk key order stable between rewrites.
pub type HistoryDocument = BTreeMap<String, Vec<Turn>>;

/// The core HistoryBackend trait.
///
/// Implementations: JSON document on disk, in-memory (for testing).
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// The backend name (e.g., "json", "memory").
    fn name(&self) -> &str;

    /// Load the whole document. A missing document is an empty one.
    async fn load(&self) -> std::result::Result<HistoryDocument, StoreError>;

    /// Replace the persisted document with `document`.
    async fn save(&self, document: &HistoryDocument) -> std::result::Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn document_serializes_as_object_of_arrays() {
        let mut doc = HistoryDocument::new();
        doc.insert("254700@s.whatsapp.net".into(), vec![Turn::new(Role::User, "hi")]);
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["254700@s.whatsapp.net"].is_array());
        assert_eq!(json["254700@s.whatsapp.net"][0]["role"], "user");
    }
}

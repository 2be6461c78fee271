//! JSON document backend: the whole history in one human-readable file.
//!
//! The document maps conversation id → ordered turns and is rewritten in
//! full on every save. Writes go to a sibling temp file first and are then
//! renamed over the original, so a crash mid-write leaves the previous
//! document intact.
//!
//! Storage location: `~/.replyd/conversation_memory.json`

use async_trait::async_trait;
use replyd_core::error::StoreError;
use replyd_core::memory::{HistoryBackend, HistoryDocument};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A file-backed history document.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".corrupt");
        self.path.with_file_name(name)
    }

    fn io_error(&self, e: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl HistoryBackend for JsonFileBackend {
    fn name(&self) -> &str {
        "json"
    }

    async fn load(&self) -> Result<HistoryDocument, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            // First run: the file is created on the first save
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HistoryDocument::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        if content.trim().is_empty() {
            return Ok(HistoryDocument::new());
        }

        match serde_json::from_str::<HistoryDocument>(&content) {
            Ok(document) => {
                debug!(path = %self.path.display(), conversations = document.len(), "History document loaded");
                Ok(document)
            }
            Err(e) => {
                // Keep the unreadable file around; the next save overwrites the original.
                let backup = self.corrupt_path();
                if let Err(copy_err) = tokio::fs::copy(&self.path, &backup).await {
                    warn!(error = %copy_err, "Failed to back up corrupt history document");
                } else {
                    warn!(backup = %backup.display(), "Corrupt history document backed up");
                }
                Err(StoreError::Corrupt(e.to_string()))
            }
        }
    }

    async fn save(&self, document: &HistoryDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let content = serde_json::to_string_pretty(document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), conversations = document.len(), "History document saved");
        Ok(())
    }
}

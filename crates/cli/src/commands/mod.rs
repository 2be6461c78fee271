pub mod ask;
pub mod config_cmd;
pub mod history;
pub mod providers;
pub mod serve;

use std::sync::Arc;

use replyd_config::AppConfig;
use replyd_memory::{ConversationStore, JsonFileBackend};

/// Open the history document without building providers, so history
/// commands work on a machine with no API keys.
pub async fn open_store(config: &AppConfig) -> ConversationStore {
    let backend = JsonFileBackend::new(config.history_path());
    ConversationStore::load(Arc::new(backend), config.memory.max_history)
        .await
        .with_ttl(config.memory.ttl())
}

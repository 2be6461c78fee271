//! Conversation memory for replyd.

pub mod file_backend;
pub mod in_memory;
pub mod store;

pub use file_backend::JsonFileBackend;
pub use in_memory::InMemoryBackend;
pub use store::{ConversationStore, SweepReport};

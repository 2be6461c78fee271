//! # replyd Core
//!
//! Domain types, traits, and error definitions for the replyd reply
//! orchestration engine. It defines the model that the store, provider
//! and dispatch crates implement against.
//!
//! ## Layout
//!
//! - [`message`]: `Role`, prompt `Message`, persisted `Turn`
//! - [`provider`]: the `Provider` trait every text-generation backend implements
//! - [`memory`]: the `HistoryBackend` trait behind the conversation store
//! - [`failure`]: semantic failure categories produced by the classifier
//! - [`error`]: error enums per bounded context

pub mod error;
pub mod failure;
pub mod memory;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, StoreError};
pub use failure::FailureKind;
pub use memory::{HistoryBackend, HistoryDocument};
pub use message::{Message, Role, Turn};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};

//! Message and Turn domain types.
//!
//! A [`Turn`] is what the conversation store keeps: a role-tagged unit of
//! text with the time it was written. A [`Message`] is what goes over the
//! wire to a provider: the same role and content without the timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a message author in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person chatting with the bot
    User,
    /// The generated reply
    Assistant,
    /// Instructions prepended to the prompt
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted unit of conversation history. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a turn with an explicit timestamp (used when loading or in tests).
    pub fn at(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }

    /// The prompt representation of this turn.
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A single prompt entry sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, Role::System);
    }

    #[test]
    fn turn_serialization_shape() {
        let turn = Turn::new(Role::User, "Hello");
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "Hello");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn turn_to_message_drops_timestamp() {
        let turn = Turn::new(Role::Assistant, "Hi there");
        let msg = turn.to_message();
        assert_eq!(msg, Message::assistant("Hi there"));
    }
}

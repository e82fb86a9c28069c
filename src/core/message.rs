//! Conversation messages and the pure operations the session engine
//! performs on a history.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::utils::id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One immutable conversation entry. `timestamp` is epoch milliseconds;
/// insertion order and timestamp order always agree within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id::message_id(),
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// Most recent user message, if any.
pub fn last_user_message(messages: &[Message]) -> Option<&Message> {
    messages.iter().rev().find(|message| message.is_user())
}

/// Drop assistant messages stamped at or after `timestamp`. Used by
/// regenerate to clear the responses that followed the reused user message.
pub fn retain_assistant_before(messages: &mut Vec<Message>, timestamp: i64) {
    messages.retain(|message| !message.is_assistant() || message.timestamp < timestamp);
}

/// Remove one message by id. Used to roll back an optimistic append.
pub fn remove_by_id(messages: &mut Vec<Message>, id: &str) {
    messages.retain(|message| message.id != id);
}

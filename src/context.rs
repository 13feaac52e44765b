//! Per-session conversation state.
//!
//! A [`ChatContext`] is an ordered, timestamped message log plus an optional
//! system prompt. Providers never create a shared default; callers construct
//! one context per logical conversation and hand it to whichever providers
//! should continue that conversation.

use std::fmt;
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a message.
///
/// Roles are not validated: the three standard roles are recognized
/// case-insensitively and anything else is kept verbatim as [`Role::Other`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    System,
    User,
    Assistant,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Other(name) => name,
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::Other(value.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded turn. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: impl Into<Role>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Default)]
pub struct ChatContext {
    messages: Mutex<Vec<Message>>,
    system_prompt: RwLock<Option<String>>,
}

impl ChatContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let context = Self::new();
        context.set_system_prompt(Some(prompt.into()));
        context
    }

    /// The system prompt is prepended to requests but never recorded as a message.
    pub fn system_prompt(&self) -> Option<String> {
        self.system_prompt
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_system_prompt(&self, prompt: Option<String>) {
        *self
            .system_prompt
            .write()
            .unwrap_or_else(PoisonError::into_inner) = prompt;
    }

    pub fn add_message(&self, role: impl Into<Role>, content: impl Into<String>) {
        self.push(Message::new(role, content));
    }

    pub fn push(&self, message: Message) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// Returns an owned snapshot; mutating it does not affect the context.
    pub fn history(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_history(&self) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn history_as_string(&self) -> String {
        self.history()
            .iter()
            .map(|message| format!("{}: {}", message.role, message.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

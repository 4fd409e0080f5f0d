//! Core types shared by every chatcord crate.
//!
//! Conversation turns use the OpenAI chat-completions shape (`role` + `content`)
//! so a stored history can be sent to any backend without conversion.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

/// Who authored a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

// ─────────────────────────────────────────────
// Session record
// ─────────────────────────────────────────────

/// Persisted conversation state for one user or channel.
///
/// On disk: `{"history": [...], "model": "...", "instruction": "..."}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRecord {
    pub history: Vec<ChatMessage>,
    pub model: String,
    pub instruction: String,
}

impl SessionRecord {
    /// A fresh record for `model` with no history.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            history: Vec::new(),
            model: model.into(),
            instruction: String::new(),
        }
    }

    /// A record carries nothing worth persisting when every field is empty.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.model.is_empty() && self.instruction.is_empty()
    }
}

// ─────────────────────────────────────────────
// Session scope
// ─────────────────────────────────────────────

/// Which persisted record a request addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionScope {
    /// The configured broadcast/system channel.
    System,
    /// A direct-message conversation with one user.
    Direct(u64),
    /// A shared guild channel.
    Channel(u64),
}

impl SessionScope {
    /// Resolve the scope for a request.
    ///
    /// `system_channel` is the configured broadcast channel id, if any.
    pub fn resolve(user_id: Option<u64>, channel_id: Option<u64>, system_channel: Option<u64>) -> Self {
        match channel_id {
            Some(ch) if Some(ch) == system_channel => SessionScope::System,
            Some(ch) => SessionScope::Channel(ch),
            None => SessionScope::Direct(user_id.unwrap_or_default()),
        }
    }

    /// Backing-store key (`system`, `user_<id>`, `channel_<id>`).
    pub fn storage_key(&self) -> String {
        match self {
            SessionScope::System => "system".to_string(),
            SessionScope::Direct(id) => format!("user_{id}"),
            SessionScope::Channel(id) => format!("channel_{id}"),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, SessionScope::Direct(_))
    }
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization() {
        let msg = ChatMessage::system("You are a helpful assistant.");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"role": "system", "content": "You are a helpful assistant."}));
    }

    #[test]
    fn test_record_defaults_missing_fields() {
        let record: SessionRecord = serde_json::from_value(json!({
            "history": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert_eq!(record.history, vec![ChatMessage::user("hi")]);
        assert!(record.model.is_empty());
        assert!(record.instruction.is_empty());
    }

    #[test]
    fn test_record_rejects_unknown_role() {
        let parsed = serde_json::from_value::<SessionRecord>(json!({
            "history": [{"role": "tool", "content": "x"}]
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_empty_record() {
        assert!(SessionRecord::default().is_empty());
        assert!(!SessionRecord::new("gpt-4o").is_empty());
    }

    #[test]
    fn test_scope_resolution() {
        assert_eq!(SessionScope::resolve(Some(7), None, Some(99)), SessionScope::Direct(7));
        assert_eq!(SessionScope::resolve(Some(7), Some(99), Some(99)), SessionScope::System);
        assert_eq!(SessionScope::resolve(Some(7), Some(5), Some(99)), SessionScope::Channel(5));
        assert_eq!(SessionScope::resolve(None, Some(5), None), SessionScope::Channel(5));
    }

    #[test]
    fn test_storage_keys() {
        assert_eq!(SessionScope::System.storage_key(), "system");
        assert_eq!(SessionScope::Direct(42).storage_key(), "user_42");
        assert_eq!(SessionScope::Channel(9).storage_key(), "channel_9");
    }
}

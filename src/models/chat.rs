// Conversation and message data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title given to a conversation until one is derived from the first turn
pub const DEFAULT_TITLE: &str = "New Chat";

/// Maximum characters kept when deriving a title from user text
pub const TITLE_MAX_CHARS: usize = 30;

/// A derived title is only written while the conversation has at most this
/// many persisted messages
pub const TITLE_DERIVATION_MAX_MESSAGES: i64 = 4;

/// Marker appended to (or standing in for) assistant output when a
/// generation is canceled mid-stream
pub const CANCEL_MARKER: &str = "[Response canceled]";

/// Model used when the caller does not specify one
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// System instructions used when the caller does not supply any
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful desktop assistant. Answer concisely and truthfully.";

/// Conversation entity - a threaded chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Display title, auto-derived from the first turn while still default
    pub title: String,
    /// Model identifier used for generations
    pub model: String,
    /// System instructions sent on the first turn of a backend thread
    pub system_prompt: String,
    /// Optional subcategory scope; None means a general conversation
    pub scope_id: Option<String>,
    /// Backend continuation token from the last completed generation
    pub last_response_id: Option<String>,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(model: String, system_prompt: String, scope_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            model,
            system_prompt,
            scope_id,
            last_response_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Message author role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            _ => Err(format!("Invalid message role: {}", s)),
        }
    }
}

/// Message entity - immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Parent conversation ID
    pub conversation_id: String,
    /// Message author role
    pub role: MessageRole,
    /// Message text content
    pub content: String,
    /// Model used (for assistant messages)
    pub model: Option<String>,
    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new user message
    pub fn user(conversation_id: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role: MessageRole::User,
            content: content.to_string(),
            model: None,
            created_at: Utc::now(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(conversation_id: &str, content: &str, model: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role: MessageRole::Assistant,
            content: content.to_string(),
            model: Some(model.to_string()),
            created_at: Utc::now(),
        }
    }
}

/// Request to send a user turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Caller-chosen identifier for this logical request
    pub request_id: String,
    /// Existing conversation ID (None to create a new conversation)
    pub conversation_id: Option<String>,
    /// User message text
    pub text: String,
    /// Model override (or initial model for a new conversation)
    pub model: Option<String>,
    /// System prompt override (or initial prompt for a new conversation)
    pub system_prompt: Option<String>,
    /// Scope hint used when creating a new conversation
    pub scope_id: Option<String>,
}

impl SendRequest {
    /// Minimal request that starts a new general conversation
    pub fn new(request_id: &str, text: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            conversation_id: None,
            text: text.to_string(),
            model: None,
            system_prompt: None,
            scope_id: None,
        }
    }
}

/// Result of a send call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub request_id: String,
    pub conversation_id: String,
    pub aborted: bool,
}

/// Result of a cancel call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_new_conversation_defaults() {
        let conversation = Conversation::new("mock".to_string(), "be brief".to_string(), None);
        assert_eq!(conversation.title, DEFAULT_TITLE);
        assert!(conversation.last_response_id.is_none());
        assert!(conversation.scope_id.is_none());
    }

    #[test]
    fn test_message_role_round_trip() {
        assert_eq!(MessageRole::from_str("user").unwrap(), MessageRole::User);
        assert_eq!(
            MessageRole::from_str("ASSISTANT").unwrap(),
            MessageRole::Assistant
        );
        assert!(MessageRole::from_str("system").is_err());
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_assistant_message_records_model() {
        let message = Message::assistant("c1", "hello", "gpt-4o-mini");
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.model.as_deref(), Some("gpt-4o-mini"));
    }
}

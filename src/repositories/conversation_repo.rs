// Conversation Repository
// Persistence for conversations and their messages

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;

use crate::models::{Conversation, Message, MessageRole};
use crate::utils::Database;

/// Repository for conversation and message persistence
#[derive(Clone)]
pub struct ConversationRepository {
    db: Database,
}

struct ConversationRow {
    id: String,
    title: String,
    model: String,
    system_prompt: String,
    scope_id: Option<String>,
    last_response_id: Option<String>,
    created_at: String,
}

struct MessageRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    model: Option<String>,
    created_at: String,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("Invalid timestamp '{}': {}", raw, e))
}

impl ConversationRow {
    fn into_conversation(self) -> Result<Conversation, String> {
        Ok(Conversation {
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            title: self.title,
            model: self.model,
            system_prompt: self.system_prompt,
            scope_id: self.scope_id,
            last_response_id: self.last_response_id,
        })
    }
}

impl MessageRow {
    fn into_message(self) -> Result<Message, String> {
        Ok(Message {
            role: MessageRole::from_str(&self.role)?,
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            conversation_id: self.conversation_id,
            content: self.content,
            model: self.model,
        })
    }
}

fn read_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        title: row.get(1)?,
        model: row.get(2)?,
        system_prompt: row.get(3)?,
        scope_id: row.get(4)?,
        last_response_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const CONVERSATION_COLUMNS: &str =
    "id, title, model, system_prompt, scope_id, last_response_id, created_at";

impl ConversationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new conversation
    pub fn create_conversation(&self, conversation: &Conversation) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, title, model, system_prompt, scope_id, last_response_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    conversation.id,
                    conversation.title,
                    conversation.model,
                    conversation.system_prompt,
                    conversation.scope_id,
                    conversation.last_response_id,
                    conversation.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to create conversation: {}", e))?;
            Ok(())
        })
    }

    /// Fetch a conversation by ID
    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, String> {
        let row = self.db.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS),
                params![id],
                read_conversation_row,
            )
            .optional()
            .map_err(|e| format!("Failed to get conversation: {}", e))
        })?;

        row.map(ConversationRow::into_conversation).transpose()
    }

    /// List all conversations, most recent first
    pub fn list_conversations(&self) -> Result<Vec<Conversation>, String> {
        let rows = self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM conversations ORDER BY created_at DESC",
                    CONVERSATION_COLUMNS
                ))
                .map_err(|e| format!("Failed to prepare query: {}", e))?;

            let rows = stmt
                .query_map([], read_conversation_row)
                .map_err(|e| format!("Failed to list conversations: {}", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| format!("Failed to read conversation row: {}", e))?;

            Ok(rows)
        })?;

        rows.into_iter()
            .map(ConversationRow::into_conversation)
            .collect()
    }

    /// Update the conversation title
    pub fn update_title(&self, id: &str, title: &str) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                "UPDATE conversations SET title = ?1 WHERE id = ?2",
                params![title, id],
            )
            .map_err(|e| format!("Failed to update title: {}", e))?;
            Ok(())
        })
    }

    /// Record the backend continuation token after a completed generation
    pub fn update_last_response_id(&self, id: &str, response_id: &str) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                "UPDATE conversations SET last_response_id = ?1 WHERE id = ?2",
                params![response_id, id],
            )
            .map_err(|e| format!("Failed to update response id: {}", e))?;
            Ok(())
        })
    }

    /// Apply per-turn overrides to an existing conversation
    pub fn update_overrides(
        &self,
        id: &str,
        model: Option<&str>,
        system_prompt: Option<&str>,
    ) -> Result<(), String> {
        self.db.with_connection(|conn| {
            match (model, system_prompt) {
                (Some(m), Some(p)) => conn.execute(
                    "UPDATE conversations SET model = ?1, system_prompt = ?2 WHERE id = ?3",
                    params![m, p, id],
                ),
                (Some(m), None) => conn.execute(
                    "UPDATE conversations SET model = ?1 WHERE id = ?2",
                    params![m, id],
                ),
                (None, Some(p)) => conn.execute(
                    "UPDATE conversations SET system_prompt = ?1 WHERE id = ?2",
                    params![p, id],
                ),
                (None, None) => return Ok(()),
            }
            .map_err(|e| format!("Failed to update conversation: {}", e))?;
            Ok(())
        })
    }

    /// Delete a conversation and its messages (cascades)
    /// Returns true when a row was removed
    pub fn delete_conversation(&self, id: &str) -> Result<bool, String> {
        self.db.with_connection(|conn| {
            let affected = conn
                .execute("DELETE FROM conversations WHERE id = ?1", params![id])
                .map_err(|e| format!("Failed to delete conversation: {}", e))?;
            Ok(affected > 0)
        })
    }

    /// Insert a message
    pub fn create_message(&self, message: &Message) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, role, content, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id,
                    message.conversation_id,
                    message.role.to_string(),
                    message.content,
                    message.model,
                    message.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to create message: {}", e))?;
            Ok(())
        })
    }

    /// List a conversation's messages in chronological order
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, String> {
        let rows = self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, conversation_id, role, content, model, created_at
                     FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC",
                )
                .map_err(|e| format!("Failed to prepare query: {}", e))?;

            let rows = stmt
                .query_map(params![conversation_id], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        role: row.get(2)?,
                        content: row.get(3)?,
                        model: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })
                .map_err(|e| format!("Failed to list messages: {}", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| format!("Failed to read message row: {}", e))?;

            Ok(rows)
        })?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Count messages in a conversation
    pub fn count_messages(&self, conversation_id: &str) -> Result<i64, String> {
        self.db.with_connection_raw(|conn: &Connection| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
        })
    }
}

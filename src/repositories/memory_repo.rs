// Memory Repository
// Persistence for durable memory facts (general and scoped)

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{ContextItem, MemorySource};
use crate::utils::Database;

/// Repository for durable memory facts
#[derive(Clone)]
pub struct MemoryRepository {
    db: Database,
}

struct ItemRow {
    id: String,
    content: String,
    scope_id: Option<String>,
    source: String,
    created_at: String,
    updated_at: String,
}

impl ItemRow {
    fn into_item(self) -> Result<ContextItem, String> {
        let parse = |raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| format!("Invalid timestamp '{}': {}", raw, e))
        };
        Ok(ContextItem {
            source: MemorySource::from_str(&self.source)?,
            created_at: parse(&self.created_at)?,
            updated_at: parse(&self.updated_at)?,
            id: self.id,
            content: self.content,
            scope_id: self.scope_id,
        })
    }
}

fn read_item_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        id: row.get(0)?,
        content: row.get(1)?,
        scope_id: row.get(2)?,
        source: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const ITEM_COLUMNS: &str = "id, content, scope_id, source, created_at, updated_at";

impl MemoryRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a memory fact
    pub fn insert_item(&self, item: &ContextItem) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO context_items (id, content, scope_id, source, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    item.id,
                    item.content,
                    item.scope_id,
                    item.source.to_string(),
                    item.created_at.to_rfc3339(),
                    item.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to insert memory item: {}", e))?;
            Ok(())
        })
    }

    /// Insert a fact unless an identical one already exists in the same scope
    /// Returns true when a new row was written
    pub fn upsert_fact(
        &self,
        content: &str,
        scope_id: Option<&str>,
        source: MemorySource,
    ) -> Result<bool, String> {
        self.db.with_transaction(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM context_items WHERE content = ?1 AND scope_id IS ?2",
                    params![content, scope_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| format!("Failed to check for existing fact: {}", e))?;

            if let Some(id) = existing {
                conn.execute(
                    "UPDATE context_items SET updated_at = ?1 WHERE id = ?2",
                    params![Utc::now().to_rfc3339(), id],
                )
                .map_err(|e| format!("Failed to touch existing fact: {}", e))?;
                return Ok(false);
            }

            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO context_items (id, content, scope_id, source, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    content,
                    scope_id,
                    source.to_string(),
                    now,
                    now,
                ],
            )
            .map_err(|e| format!("Failed to insert fact: {}", e))?;
            Ok(true)
        })
    }

    /// List general facts (no scope), oldest first
    pub fn list_general(&self) -> Result<Vec<ContextItem>, String> {
        self.query_items(
            &format!(
                "SELECT {} FROM context_items WHERE scope_id IS NULL ORDER BY created_at ASC",
                ITEM_COLUMNS
            ),
            &[],
        )
    }

    /// List facts for one scope, oldest first
    pub fn list_for_scope(&self, scope_id: &str) -> Result<Vec<ContextItem>, String> {
        self.query_items(
            &format!(
                "SELECT {} FROM context_items WHERE scope_id = ?1 ORDER BY created_at ASC",
                ITEM_COLUMNS
            ),
            &[&scope_id],
        )
    }

    /// Update the content of a fact
    pub fn update_content(&self, id: &str, content: &str) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                "UPDATE context_items SET content = ?1, updated_at = ?2 WHERE id = ?3",
                params![content, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| format!("Failed to update memory item: {}", e))?;
            Ok(())
        })
    }

    /// Delete a fact; returns true when a row was removed
    pub fn delete_item(&self, id: &str) -> Result<bool, String> {
        self.db.with_connection(|conn| {
            let affected = conn
                .execute("DELETE FROM context_items WHERE id = ?1", params![id])
                .map_err(|e| format!("Failed to delete memory item: {}", e))?;
            Ok(affected > 0)
        })
    }

    fn query_items(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ContextItem>, String> {
        let rows = self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| format!("Failed to prepare query: {}", e))?;

            let rows = stmt
                .query_map(args, read_item_row)
                .map_err(|e| format!("Failed to query memory items: {}", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| format!("Failed to read memory row: {}", e))?;

            Ok(rows)
        })?;

        rows.into_iter().map(ItemRow::into_item).collect()
    }
}

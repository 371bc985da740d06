// Provider Repository
// Persistence for backend providers, their models, and sealed API keys

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::str::FromStr;

use crate::models::{ProviderConfig, ProviderKind, ProviderModel};
use crate::utils::Database;

/// Repository for provider configuration and credentials
#[derive(Clone)]
pub struct ProviderRepository {
    db: Database,
}

struct ProviderRow {
    id: String,
    kind: String,
    label: String,
    endpoint: String,
    is_active: bool,
    created_at: String,
}

impl ProviderRow {
    fn into_config(self) -> Result<ProviderConfig, String> {
        Ok(ProviderConfig {
            kind: ProviderKind::from_str(&self.kind)?,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| format!("Invalid timestamp '{}': {}", self.created_at, e))?,
            id: self.id,
            label: self.label,
            endpoint: self.endpoint,
            is_active: self.is_active,
        })
    }
}

fn read_provider_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderRow> {
    Ok(ProviderRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        label: row.get(2)?,
        endpoint: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl ProviderRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a provider
    pub fn save_provider(&self, provider: &ProviderConfig) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO providers (id, kind, label, endpoint, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    provider.id,
                    provider.kind.to_string(),
                    provider.label,
                    provider.endpoint,
                    provider.is_active,
                    provider.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to save provider: {}", e))?;
            Ok(())
        })
    }

    /// Fetch a provider by ID
    pub fn get_provider(&self, id: &str) -> Result<Option<ProviderConfig>, String> {
        let row = self.db.with_connection(|conn| {
            conn.query_row(
                "SELECT id, kind, label, endpoint, is_active, created_at FROM providers WHERE id = ?1",
                params![id],
                read_provider_row,
            )
            .optional()
            .map_err(|e| format!("Failed to get provider: {}", e))
        })?;

        row.map(ProviderRow::into_config).transpose()
    }

    /// List all providers
    pub fn list_providers(&self) -> Result<Vec<ProviderConfig>, String> {
        let rows = self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, kind, label, endpoint, is_active, created_at
                     FROM providers ORDER BY created_at ASC",
                )
                .map_err(|e| format!("Failed to prepare query: {}", e))?;

            let rows = stmt
                .query_map([], read_provider_row)
                .map_err(|e| format!("Failed to list providers: {}", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| format!("Failed to read provider row: {}", e))?;

            Ok(rows)
        })?;

        rows.into_iter().map(ProviderRow::into_config).collect()
    }

    /// Insert or replace a model offered by a provider
    pub fn save_model(&self, model: &ProviderModel) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO provider_models (id, provider_id, display_name, is_enabled)
                 VALUES (?1, ?2, ?3, ?4)",
                params![model.id, model.provider_id, model.display_name, model.is_enabled],
            )
            .map_err(|e| format!("Failed to save provider model: {}", e))?;
            Ok(())
        })
    }

    /// Resolve the active provider that serves a given model name
    /// Only enabled models on active providers are considered
    pub fn find_provider_for_model(
        &self,
        model_name: &str,
    ) -> Result<Option<(ProviderConfig, ProviderModel)>, String> {
        let row = self.db.with_connection(|conn| {
            conn.query_row(
                "SELECT p.id, p.kind, p.label, p.endpoint, p.is_active, p.created_at,
                        m.id, m.provider_id, m.display_name, m.is_enabled
                 FROM provider_models m
                 JOIN providers p ON p.id = m.provider_id
                 WHERE m.display_name = ?1 AND m.is_enabled = 1 AND p.is_active = 1
                 LIMIT 1",
                params![model_name],
                |row| {
                    let provider = read_provider_row(row)?;
                    let model = ProviderModel {
                        id: row.get(6)?,
                        provider_id: row.get(7)?,
                        display_name: row.get(8)?,
                        is_enabled: row.get(9)?,
                    };
                    Ok((provider, model))
                },
            )
            .optional()
            .map_err(|e| format!("Failed to resolve model provider: {}", e))
        })?;

        match row {
            Some((provider, model)) => Ok(Some((provider.into_config()?, model))),
            None => Ok(None),
        }
    }

    /// Store a sealed API key for a provider (replaces any existing key)
    pub fn store_api_key(
        &self,
        provider_id: &str,
        ciphertext: &str,
        nonce: &str,
    ) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO provider_api_keys (provider_id, ciphertext, nonce)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(provider_id) DO UPDATE SET
                     ciphertext = excluded.ciphertext,
                     nonce = excluded.nonce,
                     updated_at = datetime('now')",
                params![provider_id, ciphertext, nonce],
            )
            .map_err(|e| format!("Failed to store API key: {}", e))?;
            Ok(())
        })
    }

    /// Load the sealed API key for a provider
    pub fn get_api_key(&self, provider_id: &str) -> Result<Option<(String, String)>, String> {
        self.db.with_connection(|conn| {
            conn.query_row(
                "SELECT ciphertext, nonce FROM provider_api_keys WHERE provider_id = ?1",
                params![provider_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| format!("Failed to get API key: {}", e))
        })
    }

    /// Remove the stored API key for a provider
    pub fn delete_api_key(&self, provider_id: &str) -> Result<bool, String> {
        self.db.with_connection(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM provider_api_keys WHERE provider_id = ?1",
                    params![provider_id],
                )
                .map_err(|e| format!("Failed to delete API key: {}", e))?;
            Ok(affected > 0)
        })
    }

    /// Check whether a provider has a stored API key
    pub fn has_api_key(&self, provider_id: &str) -> Result<bool, String> {
        self.db.with_connection_raw(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM provider_api_keys WHERE provider_id = ?1",
                params![provider_id],
                |row| row.get::<_, i32>(0),
            )
        })
        .map(|count| count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ProviderRepository {
        ProviderRepository::new(Database::new_in_memory().unwrap())
    }

    #[test]
    fn test_save_and_get_provider() {
        let repo = repo();
        let provider = ProviderConfig::new(ProviderKind::OpenAi, "OpenAI");
        repo.save_provider(&provider).unwrap();

        let loaded = repo.get_provider(&provider.id).unwrap().unwrap();
        assert_eq!(loaded.kind, ProviderKind::OpenAi);
        assert_eq!(loaded.endpoint, "https://api.openai.com/v1");
        assert!(loaded.is_active);
    }

    #[test]
    fn test_find_provider_for_model() {
        let repo = repo();
        let provider = ProviderConfig::new(ProviderKind::Mock, "Local mock");
        repo.save_provider(&provider).unwrap();
        repo.save_model(&ProviderModel::new(&provider.id, "mock"))
            .unwrap();

        let (found, model) = repo.find_provider_for_model("mock").unwrap().unwrap();
        assert_eq!(found.id, provider.id);
        assert_eq!(model.display_name, "mock");

        assert!(repo.find_provider_for_model("gpt-9").unwrap().is_none());
    }

    #[test]
    fn test_disabled_model_not_resolved() {
        let repo = repo();
        let provider = ProviderConfig::new(ProviderKind::Mock, "Local mock");
        repo.save_provider(&provider).unwrap();

        let mut model = ProviderModel::new(&provider.id, "mock");
        model.is_enabled = false;
        repo.save_model(&model).unwrap();

        assert!(repo.find_provider_for_model("mock").unwrap().is_none());
    }

    #[test]
    fn test_inactive_provider_not_resolved() {
        let repo = repo();
        let mut provider = ProviderConfig::new(ProviderKind::OpenAi, "OpenAI");
        provider.is_active = false;
        repo.save_provider(&provider).unwrap();
        repo.save_model(&ProviderModel::new(&provider.id, "gpt-4o-mini"))
            .unwrap();

        assert!(repo.find_provider_for_model("gpt-4o-mini").unwrap().is_none());
    }

    #[test]
    fn test_api_key_lifecycle() {
        let repo = repo();
        let provider = ProviderConfig::new(ProviderKind::OpenAi, "OpenAI");
        repo.save_provider(&provider).unwrap();

        assert!(!repo.has_api_key(&provider.id).unwrap());

        repo.store_api_key(&provider.id, "ct-1", "n-1").unwrap();
        assert!(repo.has_api_key(&provider.id).unwrap());
        assert_eq!(
            repo.get_api_key(&provider.id).unwrap(),
            Some(("ct-1".to_string(), "n-1".to_string()))
        );

        // Overwrite replaces the sealed key
        repo.store_api_key(&provider.id, "ct-2", "n-2").unwrap();
        assert_eq!(
            repo.get_api_key(&provider.id).unwrap(),
            Some(("ct-2".to_string(), "n-2".to_string()))
        );

        assert!(repo.delete_api_key(&provider.id).unwrap());
        assert!(!repo.delete_api_key(&provider.id).unwrap());
        assert!(repo.get_api_key(&provider.id).unwrap().is_none());
    }
}

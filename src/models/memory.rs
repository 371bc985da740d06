// Durable memory data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a memory fact entered the store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    /// Added explicitly by the user
    Manual,
    /// Extracted in the background from conversation turns
    Ai,
}

impl std::fmt::Display for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemorySource::Manual => write!(f, "manual"),
            MemorySource::Ai => write!(f, "ai"),
        }
    }
}

impl std::str::FromStr for MemorySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(MemorySource::Manual),
            "ai" => Ok(MemorySource::Ai),
            _ => Err(format!("Unknown memory source: {}", s)),
        }
    }
}

/// A durable memory fact
/// General facts have no scope; scoped facts belong to one subcategory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub id: String,
    pub content: String,
    pub scope_id: Option<String>,
    pub source: MemorySource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContextItem {
    pub fn new(content: &str, scope_id: Option<String>, source: MemorySource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            scope_id,
            source,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Facts extracted from a conversation turn by the background extractor
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedFacts {
    #[serde(default)]
    pub general: Vec<String>,
    #[serde(default)]
    pub scoped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_memory_source_round_trip() {
        assert_eq!(MemorySource::from_str("manual").unwrap(), MemorySource::Manual);
        assert_eq!(MemorySource::from_str("AI").unwrap(), MemorySource::Ai);
        assert!(MemorySource::from_str("system").is_err());
    }

    #[test]
    fn test_extracted_facts_tolerates_missing_fields() {
        let facts: ExtractedFacts = serde_json::from_str(r#"{"general": ["likes tea"]}"#).unwrap();
        assert_eq!(facts.general, vec!["likes tea"]);
        assert!(facts.scoped.is_empty());
    }

    #[test]
    fn test_new_context_item_timestamps_match() {
        let item = ContextItem::new("prefers metric units", None, MemorySource::Manual);
        assert_eq!(item.created_at, item.updated_at);
        assert!(item.scope_id.is_none());
    }
}

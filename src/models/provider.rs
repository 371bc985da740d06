// Model backend provider data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported backend kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Mock,
}

impl ProviderKind {
    /// Whether this backend kind needs a stored API key before use
    pub fn requires_api_key(&self) -> bool {
        match self {
            ProviderKind::OpenAi => true,
            ProviderKind::Mock => false,
        }
    }

    /// Base endpoint used when the provider does not override it
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Mock => "mock://local",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Mock => write!(f, "mock"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "mock" => Ok(ProviderKind::Mock),
            _ => Err(format!("Unknown provider kind: {}", s)),
        }
    }
}

/// A configured backend provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    /// Human-readable label shown in provider lists
    pub label: String,
    /// API base endpoint
    pub endpoint: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, label: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.to_string(),
            endpoint: kind.default_endpoint().to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// A model identifier exposed by a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderModel {
    pub id: String,
    pub provider_id: String,
    /// Model identifier as sent to the backend (e.g. "gpt-4o-mini")
    pub display_name: String,
    pub is_enabled: bool,
}

impl ProviderModel {
    pub fn new(provider_id: &str, display_name: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider_id: provider_id.to_string(),
            display_name: display_name.to_string(),
            is_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!(ProviderKind::from_str("openai").unwrap(), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_str("Mock").unwrap(), ProviderKind::Mock);
        assert!(ProviderKind::from_str("anthropic").is_err());
    }

    #[test]
    fn test_key_requirements() {
        assert!(ProviderKind::OpenAi.requires_api_key());
        assert!(!ProviderKind::Mock.requires_api_key());
    }

    #[test]
    fn test_new_provider_uses_default_endpoint() {
        let provider = ProviderConfig::new(ProviderKind::OpenAi, "OpenAI");
        assert_eq!(provider.endpoint, "https://api.openai.com/v1");
        assert!(provider.is_active);
    }
}

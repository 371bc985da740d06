// Model backend gateway
// Trait-based abstraction over streaming chat backends, with a factory
// keyed by provider configuration

pub mod error;
pub mod mock;
pub mod openai;

pub use error::{BackendError, BackendResult};
pub use mock::MockBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{ProviderConfig, ProviderKind};

/// Request for one streamed generation
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Assembled input text (memory blocks + user message)
    pub input: String,
    /// Model identifier
    pub model: String,
    /// System instructions; only set on the first turn of a thread
    pub instructions: Option<String>,
    /// Continuation token from the previous completed generation
    pub previous_response_id: Option<String>,
}

/// Request for one non-streamed generation (used by the memory extractor)
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub input: String,
    pub model: String,
    pub instructions: Option<String>,
}

/// Final result of a streamed generation
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Full accumulated output text (possibly partial when aborted)
    pub output_text: String,
    /// Continuation token; None when aborted or not provided by the backend
    pub response_id: Option<String>,
    /// True when the stream was canceled before completion
    pub aborted: bool,
}

/// Delta callback invoked for each streamed text chunk
pub type DeltaHandler<'a> = &'a mut (dyn FnMut(&str) -> Result<(), String> + Send);

/// Common interface for chat model backends
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Provider kind served by this backend
    fn kind(&self) -> ProviderKind;

    /// Stream a generation, invoking `on_delta` per text chunk.
    /// A message on `cancel` stops the stream at the next chunk boundary and
    /// resolves with the text accumulated so far and `aborted = true`.
    async fn stream(
        &self,
        request: StreamRequest,
        on_delta: DeltaHandler<'_>,
        cancel: &mut mpsc::Receiver<()>,
    ) -> BackendResult<StreamOutcome>;

    /// Run a non-streamed generation and return the full output text
    async fn complete(&self, request: CompletionRequest) -> BackendResult<String>;
}

pub type BoxedBackend = Box<dyn ChatBackend>;

/// Create a backend instance from provider configuration
pub fn create_backend(
    provider: &ProviderConfig,
    api_key: Option<String>,
) -> BackendResult<BoxedBackend> {
    match provider.kind {
        ProviderKind::OpenAi => {
            let key = api_key
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    BackendError::InvalidConfig(format!(
                        "Provider '{}' requires an API key",
                        provider.label
                    ))
                })?;
            Ok(Box::new(OpenAiBackend::new(&provider.endpoint, key)))
        }
        ProviderKind::Mock => Ok(Box::new(MockBackend::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_openai_requires_key() {
        let provider = ProviderConfig::new(ProviderKind::OpenAi, "OpenAI");

        assert!(matches!(
            create_backend(&provider, None),
            Err(BackendError::InvalidConfig(_))
        ));
        assert!(matches!(
            create_backend(&provider, Some("   ".to_string())),
            Err(BackendError::InvalidConfig(_))
        ));

        let backend = create_backend(&provider, Some("sk-test".to_string())).unwrap();
        assert_eq!(backend.kind(), ProviderKind::OpenAi);
    }

    #[test]
    fn test_factory_mock_needs_no_key() {
        let provider = ProviderConfig::new(ProviderKind::Mock, "Local mock");
        let backend = create_backend(&provider, None).unwrap();
        assert_eq!(backend.kind(), ProviderKind::Mock);
        assert_eq!(backend.name(), "mock");
    }
}

// Chat Orchestrator
//
// Drives a full turn: resolves conversational state, assembles input,
// streams the generation with cooperative cancellation, persists results,
// and spawns background memory extraction.

pub mod context;
pub mod events;
pub mod extractor;
pub mod registry;

pub use events::{ChannelEventSink, ChatEvent, EventSink};
pub use registry::{RegistryError, StreamRegistry};

use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    CancelOutcome, Conversation, ContextItem, Message, ProviderConfig, ProviderKind,
    ProviderModel, SendOutcome, SendRequest, CANCEL_MARKER, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT,
    DEFAULT_TITLE, TITLE_DERIVATION_MAX_MESSAGES, TITLE_MAX_CHARS,
};
use crate::repositories::{ConversationRepository, MemoryRepository, ProviderRepository};
use crate::services::backend::{self, BackendError, StreamRequest};
use crate::services::vault::{CredentialVault, VaultError};
use crate::utils::Database;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("No active provider serves model '{0}'")]
    ModelNotResolved(String),

    #[error("Provider '{0}' has no stored credential")]
    MissingCredential(String),

    #[error("Request '{0}' is already in flight")]
    DuplicateRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl From<RegistryError> for ChatError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateRequest(id) => ChatError::DuplicateRequest(id),
        }
    }
}

/// Resolved backend invocation context for one turn
struct TurnBackend {
    provider: ProviderConfig,
    api_key: Option<String>,
}

/// Conversation orchestrator
pub struct ChatService {
    conversations: ConversationRepository,
    memory: MemoryRepository,
    providers: ProviderRepository,
    vault: CredentialVault,
    registry: Arc<StreamRegistry>,
    sink: Arc<dyn EventSink>,
}

impl ChatService {
    pub fn new(db: Database, sink: Arc<dyn EventSink>) -> Self {
        Self {
            conversations: ConversationRepository::new(db.clone()),
            memory: MemoryRepository::new(db.clone()),
            providers: ProviderRepository::new(db.clone()),
            vault: CredentialVault::new(db),
            registry: Arc::new(StreamRegistry::new()),
            sink,
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Handle one user turn end to end
    pub async fn handle_send(&self, request: SendRequest) -> Result<SendOutcome, ChatError> {
        let conversation = self.resolve_conversation(&request)?;

        // Record the turn before contacting the backend
        let user_message = Message::user(&conversation.id, &request.text);
        self.conversations
            .create_message(&user_message)
            .map_err(ChatError::Storage)?;

        let instructions = resolve_instructions(&conversation);
        let input = self.assemble_input(&conversation, &request.text)?;

        let turn = self.resolve_backend(&conversation.model)?;
        let backend = backend::create_backend(&turn.provider, turn.api_key.clone())?;

        let mut cancel_rx = self.registry.register(&request.request_id).await?;

        let request_id = request.request_id.clone();
        let sink = Arc::clone(&self.sink);
        let mut on_delta = move |delta: &str| {
            sink.emit(ChatEvent::Chunk {
                request_id: request_id.clone(),
                delta: delta.to_string(),
            })
        };

        let stream_result = backend
            .stream(
                StreamRequest {
                    input,
                    model: conversation.model.clone(),
                    instructions,
                    previous_response_id: conversation.last_response_id.clone(),
                },
                &mut on_delta,
                &mut cancel_rx,
            )
            .await;

        // Session entry is cleared no matter how the stream ended
        self.registry.remove(&request.request_id).await;

        let outcome = match stream_result {
            Ok(outcome) => outcome,
            Err(e) => {
                // Streaming failures never raise past the handler
                log::error!(
                    "Generation failed for request {} ({}): {}",
                    request.request_id,
                    e.code(),
                    e
                );
                let _ = self.sink.emit(ChatEvent::Error {
                    request_id: request.request_id.clone(),
                    message: e.to_string(),
                });
                return Ok(SendOutcome {
                    request_id: request.request_id,
                    conversation_id: conversation.id,
                    aborted: false,
                });
            }
        };

        let content = assistant_content(&outcome.output_text, outcome.aborted);
        if let Some(ref content) = content {
            let assistant = Message::assistant(&conversation.id, content, &conversation.model);
            self.conversations
                .create_message(&assistant)
                .map_err(ChatError::Storage)?;
        }

        if let Some(ref response_id) = outcome.response_id {
            self.conversations
                .update_last_response_id(&conversation.id, response_id)
                .map_err(ChatError::Storage)?;
        }

        self.maybe_derive_title(&conversation, &request.text)?;

        let _ = self.sink.emit(ChatEvent::Complete {
            request_id: request.request_id.clone(),
            conversation_id: conversation.id.clone(),
            content: content.clone().unwrap_or_default(),
            response_id: outcome.response_id.clone(),
            aborted: outcome.aborted,
        });

        let should_extract = !outcome.aborted
            && !outcome.output_text.is_empty()
            && turn.provider.kind != ProviderKind::Mock
            && conversation.scope_id.is_some();

        if should_extract {
            if let Some(scope_id) = conversation.scope_id.clone() {
                // Separate backend instance so the detached task owns it
                match backend::create_backend(&turn.provider, turn.api_key) {
                    Ok(extraction_backend) => extractor::spawn_extraction(
                        extraction_backend,
                        self.memory.clone(),
                        scope_id,
                        request.text.clone(),
                        conversation.model.clone(),
                    ),
                    Err(e) => log::warn!("Skipping memory extraction: {}", e),
                }
            }
        }

        Ok(SendOutcome {
            request_id: request.request_id,
            conversation_id: conversation.id,
            aborted: outcome.aborted,
        })
    }

    /// Signal cancellation for an in-flight generation
    pub async fn cancel(&self, request_id: &str) -> CancelOutcome {
        if self.registry.cancel(request_id).await {
            CancelOutcome {
                success: true,
                message: None,
            }
        } else {
            CancelOutcome {
                success: false,
                message: Some(format!("No active generation for request '{}'", request_id)),
            }
        }
    }

    fn resolve_conversation(&self, request: &SendRequest) -> Result<Conversation, ChatError> {
        match &request.conversation_id {
            Some(id) => {
                let existing = self
                    .conversations
                    .get_conversation(id)
                    .map_err(ChatError::Storage)?
                    .ok_or_else(|| ChatError::ConversationNotFound(id.clone()))?;

                if request.model.is_some() || request.system_prompt.is_some() {
                    self.conversations
                        .update_overrides(
                            id,
                            request.model.as_deref(),
                            request.system_prompt.as_deref(),
                        )
                        .map_err(ChatError::Storage)?;
                    return self
                        .conversations
                        .get_conversation(id)
                        .map_err(ChatError::Storage)?
                        .ok_or_else(|| ChatError::ConversationNotFound(id.clone()));
                }

                Ok(existing)
            }
            None => {
                let conversation = Conversation::new(
                    request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                    request
                        .system_prompt
                        .clone()
                        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
                    request.scope_id.clone(),
                );
                self.conversations
                    .create_conversation(&conversation)
                    .map_err(ChatError::Storage)?;
                Ok(conversation)
            }
        }
    }

    fn assemble_input(
        &self,
        conversation: &Conversation,
        user_text: &str,
    ) -> Result<String, ChatError> {
        let general: Vec<String> = self
            .memory
            .list_general()
            .map_err(ChatError::Storage)?
            .into_iter()
            .map(|item| item.content)
            .collect();

        let scoped: Vec<String> = match &conversation.scope_id {
            Some(scope_id) => self
                .memory
                .list_for_scope(scope_id)
                .map_err(ChatError::Storage)?
                .into_iter()
                .map(|item| item.content)
                .collect(),
            None => Vec::new(),
        };

        Ok(context::assemble(&general, &scoped, user_text))
    }

    fn resolve_backend(&self, model: &str) -> Result<TurnBackend, ChatError> {
        let (provider, _model) = self
            .providers
            .find_provider_for_model(model)
            .map_err(ChatError::Storage)?
            .ok_or_else(|| ChatError::ModelNotResolved(model.to_string()))?;

        let api_key = if provider.kind.requires_api_key() {
            let key = self
                .vault
                .load_credential(&provider.id)?
                .ok_or_else(|| ChatError::MissingCredential(provider.label.clone()))?;
            Some(key)
        } else {
            None
        };

        Ok(TurnBackend { provider, api_key })
    }

    fn maybe_derive_title(
        &self,
        conversation: &Conversation,
        user_text: &str,
    ) -> Result<(), ChatError> {
        if conversation.title != DEFAULT_TITLE {
            return Ok(());
        }

        let count = self
            .conversations
            .count_messages(&conversation.id)
            .map_err(ChatError::Storage)?;
        if count > TITLE_DERIVATION_MAX_MESSAGES {
            return Ok(());
        }

        let title = derive_title(user_text);
        self.conversations
            .update_title(&conversation.id, &title)
            .map_err(ChatError::Storage)
    }

    // Read-side operations

    pub fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        self.conversations.list_conversations().map_err(ChatError::Storage)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, ChatError> {
        self.conversations.get_conversation(id).map_err(ChatError::Storage)
    }

    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        self.conversations
            .list_messages(conversation_id)
            .map_err(ChatError::Storage)
    }

    pub fn delete_conversation(&self, id: &str) -> Result<bool, ChatError> {
        self.conversations.delete_conversation(id).map_err(ChatError::Storage)
    }

    // Memory management passthroughs

    pub fn add_memory(&self, item: &ContextItem) -> Result<(), ChatError> {
        self.memory.insert_item(item).map_err(ChatError::Storage)
    }

    pub fn list_general_memory(&self) -> Result<Vec<ContextItem>, ChatError> {
        self.memory.list_general().map_err(ChatError::Storage)
    }

    pub fn list_scoped_memory(&self, scope_id: &str) -> Result<Vec<ContextItem>, ChatError> {
        self.memory.list_for_scope(scope_id).map_err(ChatError::Storage)
    }

    pub fn update_memory(&self, id: &str, content: &str) -> Result<(), ChatError> {
        self.memory.update_content(id, content).map_err(ChatError::Storage)
    }

    pub fn delete_memory(&self, id: &str) -> Result<bool, ChatError> {
        self.memory.delete_item(id).map_err(ChatError::Storage)
    }

    // Provider setup

    pub fn add_provider(
        &self,
        provider: &ProviderConfig,
        api_key: Option<&str>,
    ) -> Result<(), ChatError> {
        self.providers.save_provider(provider).map_err(ChatError::Storage)?;
        if let Some(key) = api_key {
            self.vault.store_credential(&provider.id, key)?;
        }
        Ok(())
    }

    pub fn add_provider_model(&self, model: &ProviderModel) -> Result<(), ChatError> {
        self.providers.save_model(model).map_err(ChatError::Storage)
    }
}

/// System instructions are only sent on the first turn of a backend thread;
/// a continuation token means the thread already carries them.
fn resolve_instructions(conversation: &Conversation) -> Option<String> {
    if conversation.last_response_id.is_some() {
        None
    } else {
        Some(conversation.system_prompt.clone())
    }
}

/// Content to persist for the assistant message, if any
fn assistant_content(output_text: &str, aborted: bool) -> Option<String> {
    match (aborted, output_text.is_empty()) {
        (true, true) => Some(CANCEL_MARKER.to_string()),
        (true, false) => Some(format!("{}\n\n{}", output_text, CANCEL_MARKER)),
        (false, false) => Some(output_text.to_string()),
        (false, true) => None,
    }
}

/// Derive a conversation title from the first user text
fn derive_title(user_text: &str) -> String {
    let text = user_text.trim();
    let chars: Vec<char> = text.chars().collect();

    if chars.len() <= TITLE_MAX_CHARS {
        text.to_string()
    } else {
        let prefix: String = chars[..TITLE_MAX_CHARS].iter().collect();
        format!("{}…", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemorySource;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (ChatService, UnboundedReceiver<ChatEvent>, Database) {
        let db = Database::new_in_memory().unwrap();
        let (sink, events) = ChannelEventSink::new();
        let service = ChatService::new(db.clone(), sink);

        let provider = ProviderConfig::new(ProviderKind::Mock, "Local mock");
        service.add_provider(&provider, None).unwrap();
        service
            .add_provider_model(&ProviderModel::new(&provider.id, "mock"))
            .unwrap();

        (service, events, db)
    }

    fn mock_request(request_id: &str, text: &str) -> SendRequest {
        let mut request = SendRequest::new(request_id, text);
        request.model = Some("mock".to_string());
        request
    }

    fn drain(events: &mut UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut collected = Vec::new();
        while let Ok(event) = events.try_recv() {
            collected.push(event);
        }
        collected
    }

    #[test]
    fn test_resolve_instructions_only_on_first_turn() {
        let mut conversation =
            Conversation::new("mock".to_string(), "be brief".to_string(), None);
        assert_eq!(resolve_instructions(&conversation).as_deref(), Some("be brief"));

        conversation.last_response_id = Some("resp-1".to_string());
        assert!(resolve_instructions(&conversation).is_none());
    }

    #[test]
    fn test_assistant_content_variants() {
        assert_eq!(assistant_content("hi", false).as_deref(), Some("hi"));
        assert_eq!(assistant_content("", false), None);
        assert_eq!(
            assistant_content("Hello wo", true).as_deref(),
            Some("Hello wo\n\n[Response canceled]")
        );
        assert_eq!(assistant_content("", true).as_deref(), Some("[Response canceled]"));
    }

    #[test]
    fn test_derive_title_truncation() {
        assert_eq!(derive_title("short question"), "short question");

        let long = "a".repeat(35);
        let title = derive_title(&long);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }

    #[tokio::test]
    async fn test_send_creates_conversation_and_messages() {
        let (service, mut events, _db) = setup();

        let outcome = service
            .handle_send(mock_request("req-1", "hello there"))
            .await
            .unwrap();
        assert!(!outcome.aborted);

        let messages = service.list_messages(&outcome.conversation_id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello there");
        assert!(!messages[1].content.is_empty());

        let collected = drain(&mut events);
        assert!(collected
            .iter()
            .any(|e| matches!(e, ChatEvent::Chunk { .. })));
        assert!(matches!(
            collected.last().unwrap(),
            ChatEvent::Complete { aborted: false, .. }
        ));
        assert!(!collected
            .iter()
            .any(|e| matches!(e, ChatEvent::Error { .. })));

        // Session cleared after completion
        assert_eq!(service.registry().active_count().await, 0);
    }

    #[tokio::test]
    async fn test_continuation_token_persisted_and_instructions_dropped() {
        let (service, _events, _db) = setup();

        let outcome = service
            .handle_send(mock_request("req-1", "first turn"))
            .await
            .unwrap();

        let conversation = service
            .get_conversation(&outcome.conversation_id)
            .unwrap()
            .unwrap();
        let token = conversation.last_response_id.clone().unwrap();
        assert!(token.starts_with("mock-resp-"));
        assert!(resolve_instructions(&conversation).is_none());

        // Second turn reuses the conversation and gets a fresh token
        let mut second = mock_request("req-2", "second turn");
        second.conversation_id = Some(outcome.conversation_id.clone());
        service.handle_send(second).await.unwrap();

        let conversation = service
            .get_conversation(&outcome.conversation_id)
            .unwrap()
            .unwrap();
        assert_ne!(conversation.last_response_id.unwrap(), token);
    }

    #[tokio::test]
    async fn test_duplicate_request_id_rejected() {
        let (service, _events, _db) = setup();

        // Pre-register the id as if a generation were already in flight
        let _rx = service.registry().register("req-1").await.unwrap();

        let err = service
            .handle_send(mock_request("req-1", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::DuplicateRequest(_)));

        // The original session must not have been displaced
        assert!(service.registry().contains("req-1").await);
    }

    #[tokio::test]
    async fn test_unknown_model_fails_before_generation() {
        let (service, mut events, _db) = setup();

        let mut request = SendRequest::new("req-1", "hello");
        request.model = Some("no-such-model".to_string());

        let err = service.handle_send(request).await.unwrap_err();
        assert!(matches!(err, ChatError::ModelNotResolved(_)));

        // User message is recorded, nothing streamed
        let conversations = service.list_conversations().unwrap();
        let messages = service.list_messages(&conversations[0].id).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(drain(&mut events).is_empty());
        assert_eq!(service.registry().active_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_generation() {
        let (service, mut events, _db) = setup();

        let provider = ProviderConfig::new(ProviderKind::OpenAi, "OpenAI");
        service.add_provider(&provider, None).unwrap();
        service
            .add_provider_model(&ProviderModel::new(&provider.id, "gpt-4o-mini"))
            .unwrap();

        let mut request = SendRequest::new("req-1", "hello");
        request.model = Some("gpt-4o-mini".to_string());

        let err = service.handle_send(request).await.unwrap_err();
        assert!(matches!(err, ChatError::MissingCredential(_)));
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_streaming_failure_emits_error_event() {
        let (service, mut events, _db) = setup();

        // Unreachable endpoint, credential present, so the failure happens
        // during streaming rather than setup
        let mut provider = ProviderConfig::new(ProviderKind::OpenAi, "OpenAI");
        provider.endpoint = "http://127.0.0.1:1/v1".to_string();
        service.add_provider(&provider, Some("sk-test")).unwrap();
        service
            .add_provider_model(&ProviderModel::new(&provider.id, "gpt-4o-mini"))
            .unwrap();

        let mut request = SendRequest::new("req-1", "hello");
        request.model = Some("gpt-4o-mini".to_string());

        let outcome = service.handle_send(request).await.unwrap();
        assert!(!outcome.aborted);

        let collected = drain(&mut events);
        assert_eq!(
            collected
                .iter()
                .filter(|e| matches!(e, ChatEvent::Error { .. }))
                .count(),
            1
        );
        assert!(!collected
            .iter()
            .any(|e| matches!(e, ChatEvent::Complete { .. })));

        // Only the user message persisted, session cleared
        let messages = service.list_messages(&outcome.conversation_id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(service.registry().active_count().await, 0);
    }

    #[tokio::test]
    async fn test_title_derived_from_first_turn() {
        let (service, _events, _db) = setup();

        let long_text = "x".repeat(35);
        let outcome = service
            .handle_send(mock_request("req-1", &long_text))
            .await
            .unwrap();

        let conversation = service
            .get_conversation(&outcome.conversation_id)
            .unwrap()
            .unwrap();
        assert_eq!(conversation.title.chars().count(), TITLE_MAX_CHARS + 1);
        assert!(conversation.title.ends_with('…'));
    }

    #[tokio::test]
    async fn test_title_not_rederived_after_enough_messages() {
        let (service, _events, _db) = setup();

        let outcome = service
            .handle_send(mock_request("req-1", "first"))
            .await
            .unwrap();
        let conversation_id = outcome.conversation_id.clone();

        for (i, text) in ["second", "third"].iter().enumerate() {
            let mut request = mock_request(&format!("req-{}", i + 2), text);
            request.conversation_id = Some(conversation_id.clone());
            service.handle_send(request).await.unwrap();
        }

        // 6 messages persisted by now; title stays at the first derivation
        let conversation = service.get_conversation(&conversation_id).unwrap().unwrap();
        assert_eq!(conversation.title, "first");
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_persists_marked_partial() {
        let (service, mut events, db) = setup();
        let service = Arc::new(service);

        let handle = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .handle_send(mock_request("req-1", "tell me a long story"))
                    .await
            })
        };

        // Wait for a couple of chunks, then cancel
        let mut chunks = 0;
        while chunks < 2 {
            match events.recv().await {
                Some(ChatEvent::Chunk { .. }) => chunks += 1,
                Some(_) => {}
                None => panic!("event channel closed early"),
            }
        }
        let canceled = service.cancel("req-1").await;
        assert!(canceled.success);

        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.aborted);

        let messages = ConversationRepository::new(db)
            .list_messages(&outcome.conversation_id)
            .unwrap();
        assert_eq!(messages.len(), 2);
        let assistant = &messages[1];
        assert!(assistant.content.ends_with(CANCEL_MARKER));
        assert!(service.registry().active_count().await == 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_request() {
        let (service, _events, _db) = setup();

        let outcome = service.cancel("nope").await;
        assert!(!outcome.success);
        assert!(outcome.message.is_some());
    }

    #[tokio::test]
    async fn test_memory_facts_flow_into_input() {
        let (service, _events, _db) = setup();

        service
            .add_memory(&ContextItem::new("likes tea", None, MemorySource::Manual))
            .unwrap();
        service
            .add_memory(&ContextItem::new(
                "works in Rust",
                Some("coding".to_string()),
                MemorySource::Manual,
            ))
            .unwrap();

        let conversation =
            Conversation::new("mock".to_string(), String::new(), Some("coding".to_string()));
        let input = service.assemble_input(&conversation, "help me").unwrap();

        let tea = input.find("likes tea").unwrap();
        let rust = input.find("works in Rust").unwrap();
        let ask = input.find("help me").unwrap();
        assert!(tea < rust && rust < ask);
    }

    #[tokio::test]
    async fn test_delete_conversation_removes_thread() {
        let (service, _events, _db) = setup();

        let outcome = service
            .handle_send(mock_request("req-1", "hello"))
            .await
            .unwrap();

        assert!(service.delete_conversation(&outcome.conversation_id).unwrap());
        assert!(service
            .get_conversation(&outcome.conversation_id)
            .unwrap()
            .is_none());
        assert!(service
            .list_messages(&outcome.conversation_id)
            .unwrap()
            .is_empty());
    }
}

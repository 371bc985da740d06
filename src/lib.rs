// Colloquy
// Conversation orchestration and streaming pipeline for a desktop
// conversational assistant: threaded conversations, pluggable model
// backends, cancellable streaming, and background memory extraction.

pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

pub use models::*;
pub use repositories::{ConversationRepository, MemoryRepository, ProviderRepository};
pub use services::backend::{
    create_backend, BackendError, BoxedBackend, ChatBackend, MockBackend, OpenAiBackend,
};
pub use services::chat::{
    ChannelEventSink, ChatError, ChatEvent, ChatService, EventSink, StreamRegistry,
};
pub use services::vault::CredentialVault;
pub use utils::Database;

// Repository modules
// SQLite-backed persistence for conversations, memory, and providers

pub mod conversation_repo;
pub mod memory_repo;
pub mod provider_repo;

pub use conversation_repo::ConversationRepository;
pub use memory_repo::MemoryRepository;
pub use provider_repo::ProviderRepository;

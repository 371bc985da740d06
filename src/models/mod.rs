// Data models module
// Serde structs shared by the orchestrator, repositories, and gateway

pub mod chat;
pub mod memory;
pub mod provider;

pub use chat::*;
pub use memory::*;
pub use provider::*;

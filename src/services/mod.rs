// Service modules
// Backend gateway, chat orchestration, credential sealing

pub mod backend;
pub mod chat;
pub mod crypto;
pub mod vault;

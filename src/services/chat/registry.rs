// Stream Session Registry
//
// Tracks in-flight generations by request ID and hands out per-request
// cancellation channels. Duplicate request IDs are rejected rather than
// overwritten so a cancel can never target the wrong stream.

use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Request '{0}' is already in flight")]
    DuplicateRequest(String),
}

/// Registry of active streaming sessions (request_id -> cancel sender)
pub struct StreamRegistry {
    sessions: RwLock<HashMap<String, mpsc::Sender<()>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session and return its cancel receiver
    pub async fn register(&self, request_id: &str) -> Result<mpsc::Receiver<()>, RegistryError> {
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(request_id) {
            return Err(RegistryError::DuplicateRequest(request_id.to_string()));
        }

        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        sessions.insert(request_id.to_string(), cancel_tx);
        Ok(cancel_rx)
    }

    /// Signal cancellation for a session; returns false when unknown
    pub async fn cancel(&self, request_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;

        if let Some(cancel_tx) = sessions.remove(request_id) {
            let _ = cancel_tx.send(()).await;
            true
        } else {
            false
        }
    }

    /// Remove a session (called when streaming finishes either way)
    pub async fn remove(&self, request_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(request_id);
    }

    /// Check if a session exists
    pub async fn contains(&self, request_id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.contains_key(request_id)
    }

    /// Number of active sessions
    pub async fn active_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_remove() {
        let registry = StreamRegistry::new();

        let _rx = registry.register("req-1").await.unwrap();
        assert!(registry.contains("req-1").await);
        assert_eq!(registry.active_count().await, 1);

        registry.remove("req-1").await;
        assert!(!registry.contains("req-1").await);
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_request_rejected() {
        let registry = StreamRegistry::new();

        let _rx = registry.register("req-1").await.unwrap();
        let err = registry.register("req-1").await.unwrap_err();
        assert_eq!(err, RegistryError::DuplicateRequest("req-1".to_string()));

        // Original session is untouched
        assert!(registry.contains("req-1").await);
    }

    #[tokio::test]
    async fn test_cancel_signals_receiver() {
        let registry = StreamRegistry::new();

        let mut rx = registry.register("req-1").await.unwrap();
        assert!(registry.cancel("req-1").await);

        assert!(rx.try_recv().is_ok());
        assert!(!registry.contains("req-1").await);
    }

    #[tokio::test]
    async fn test_cancel_unknown_request() {
        let registry = StreamRegistry::new();
        assert!(!registry.cancel("nope").await);
    }

    #[tokio::test]
    async fn test_multiple_sessions() {
        let registry = StreamRegistry::new();

        let _a = registry.register("a").await.unwrap();
        let _b = registry.register("b").await.unwrap();
        let _c = registry.register("c").await.unwrap();
        assert_eq!(registry.active_count().await, 3);

        registry.remove("b").await;
        assert_eq!(registry.active_count().await, 2);
        assert!(registry.contains("a").await);
        assert!(!registry.contains("b").await);
        assert!(registry.contains("c").await);
    }
}

// Chat events
//
// Events emitted while a generation streams. The sink trait decouples the
// orchestrator from any particular delivery surface; the channel sink is
// what tests and embedding callers use.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events emitted during a streamed generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// Incremental text chunk
    #[serde(rename_all = "camelCase")]
    Chunk { request_id: String, delta: String },

    /// Terminal success event with the full assistant content
    #[serde(rename_all = "camelCase")]
    Complete {
        request_id: String,
        conversation_id: String,
        content: String,
        response_id: Option<String>,
        aborted: bool,
    },

    /// Terminal failure event
    #[serde(rename_all = "camelCase")]
    Error { request_id: String, message: String },
}

/// Destination for chat events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ChatEvent) -> Result<(), String>;
}

/// Event sink backed by an unbounded channel
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ChatEvent) -> Result<(), String> {
        self.tx
            .send(event)
            .map_err(|e| format!("Failed to emit event: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_event_serialization() {
        let event = ChatEvent::Chunk {
            request_id: "req-1".to_string(),
            delta: "hel".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"Chunk""#));
        assert!(json.contains(r#""requestId":"req-1""#));
        assert!(json.contains(r#""delta":"hel""#));
    }

    #[test]
    fn test_complete_event_round_trip() {
        let event = ChatEvent::Complete {
            request_id: "req-1".to_string(),
            conversation_id: "c1".to_string(),
            content: "hello".to_string(),
            response_id: Some("resp-1".to_string()),
            aborted: false,
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: ChatEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_events() {
        let (sink, mut rx) = ChannelEventSink::new();

        sink.emit(ChatEvent::Error {
            request_id: "req-1".to_string(),
            message: "boom".to_string(),
        })
        .unwrap();

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, ChatEvent::Error { .. }));
    }
}

// Mock Backend Implementation
//
// Deterministic in-process backend for development and tests. Streams a
// canned (or scripted) reply word by word with a small delay so that
// cancellation paths are exercisable. Requires no API key.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use uuid::Uuid;

use super::{BackendResult, ChatBackend, CompletionRequest, StreamOutcome, StreamRequest};
use crate::models::ProviderKind;

const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(20);

const DEFAULT_REPLY: &str =
    "This is a mock reply. It streams word by word so the pipeline can be exercised offline.";

/// Mock Backend
pub struct MockBackend {
    chunk_delay: Duration,
    script: Option<String>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            chunk_delay: DEFAULT_CHUNK_DELAY,
            script: None,
        }
    }

    /// Use a fixed reply instead of the default canned text
    pub fn with_script(script: &str) -> Self {
        Self {
            chunk_delay: DEFAULT_CHUNK_DELAY,
            script: Some(script.to_string()),
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    fn reply(&self) -> &str {
        self.script.as_deref().unwrap_or(DEFAULT_REPLY)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn stream(
        &self,
        _request: StreamRequest,
        on_delta: super::DeltaHandler<'_>,
        cancel: &mut mpsc::Receiver<()>,
    ) -> BackendResult<StreamOutcome> {
        let reply = self.reply().to_string();
        let mut output_text = String::new();

        // Word-level chunks, whitespace kept with the preceding word
        for chunk in reply.split_inclusive(' ') {
            tokio::select! {
                biased;

                _ = cancel.recv() => {
                    log::info!("Mock stream canceled after {} chars", output_text.len());
                    return Ok(StreamOutcome {
                        output_text,
                        response_id: None,
                        aborted: true,
                    });
                }

                _ = sleep(self.chunk_delay) => {
                    output_text.push_str(chunk);
                    on_delta(chunk).map_err(super::BackendError::Delivery)?;
                }
            }
        }

        Ok(StreamOutcome {
            output_text,
            response_id: Some(format!("mock-resp-{}", Uuid::new_v4().simple())),
            aborted: false,
        })
    }

    async fn complete(&self, _request: CompletionRequest) -> BackendResult<String> {
        Ok(self.reply().to_string())
    }
}

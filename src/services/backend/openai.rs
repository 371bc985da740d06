// OpenAI Backend Implementation
//
// Talks to the OpenAI Responses API. Streaming uses server-sent events;
// multi-turn threads continue via `previous_response_id` instead of
// resending history. Requires API key.
// Default endpoint: https://api.openai.com/v1

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{BackendError, BackendResult, ChatBackend, CompletionRequest, StreamOutcome, StreamRequest};
use crate::models::ProviderKind;

/// Timeout for non-streamed completion requests
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI Backend
pub struct OpenAiBackend {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiBackend {
    pub fn new(endpoint: &str, api_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
            api_key,
        }
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.endpoint.trim_end_matches('/');
        format!("{}{}", base, path)
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }
}

// Responses API types
#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamEventData {
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    response: Option<StreamEventResponse>,
    #[serde(default)]
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct StreamEventResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    id: String,
    output: Vec<ResponseOutputItem>,
}

#[derive(Debug, Deserialize)]
struct ResponseOutputItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    content: Vec<ResponseContentPart>,
}

#[derive(Debug, Deserialize)]
struct ResponseContentPart {
    #[serde(rename = "type")]
    part_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    message: String,
}

fn map_status_error(status: reqwest::StatusCode, body: &str, model: &str) -> BackendError {
    if let Ok(error) = serde_json::from_str::<ApiError>(body) {
        let error_type = error.error.error_type.as_deref().unwrap_or("");

        if status.as_u16() == 401 || error_type == "authentication_error" {
            return BackendError::AuthFailed(error.error.message);
        }
        if status.as_u16() == 429 || error_type == "rate_limit_error" {
            return BackendError::RateLimited;
        }
        if error_type == "not_found_error" || error.error.message.contains("model") {
            return BackendError::ModelNotFound(model.to_string());
        }

        return BackendError::Api(error.error.message);
    }

    BackendError::Api(format!("OpenAI API error ({}): {}", status, body))
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn stream(
        &self,
        request: StreamRequest,
        on_delta: super::DeltaHandler<'_>,
        cancel: &mut mpsc::Receiver<()>,
    ) -> BackendResult<StreamOutcome> {
        let url = self.api_url("/responses");
        let model = request.model.clone();

        let body = ResponsesRequest {
            model: request.model,
            input: request.input,
            instructions: request.instructions,
            previous_response_id: request.previous_response_id,
            stream: true,
        };

        let builder = self
            .client
            .post(&url)
            .headers(self.auth_headers())
            .json(&body);

        let mut source = EventSource::new(builder)
            .map_err(|e| BackendError::Stream(format!("Failed to open event stream: {}", e)))?;

        let mut output_text = String::new();
        let mut response_id: Option<String> = None;
        let mut aborted = false;

        loop {
            tokio::select! {
                biased;

                _ = cancel.recv() => {
                    log::info!("OpenAI stream canceled after {} chars", output_text.len());
                    source.close();
                    aborted = true;
                    break;
                }

                event = source.next() => {
                    match event {
                        Some(Ok(Event::Open)) => {}
                        Some(Ok(Event::Message(message))) => {
                            match message.event.as_str() {
                                "response.output_text.delta" => {
                                    let data: StreamEventData =
                                        serde_json::from_str(&message.data)?;
                                    if let Some(delta) = data.delta {
                                        output_text.push_str(&delta);
                                        on_delta(&delta).map_err(BackendError::Delivery)?;
                                    }
                                }
                                "response.completed" => {
                                    let data: StreamEventData =
                                        serde_json::from_str(&message.data)?;
                                    response_id = data.response.map(|r| r.id);
                                    source.close();
                                    break;
                                }
                                "response.failed" | "error" => {
                                    source.close();
                                    let data: StreamEventData =
                                        serde_json::from_str(&message.data).unwrap_or(
                                            StreamEventData {
                                                delta: None,
                                                response: None,
                                                error: None,
                                            },
                                        );
                                    let detail = data
                                        .error
                                        .map(|e| e.message)
                                        .unwrap_or_else(|| message.data.clone());
                                    return Err(BackendError::Api(detail));
                                }
                                // Lifecycle events we don't act on
                                _ => {}
                            }
                        }
                        Some(Err(reqwest_eventsource::Error::StreamEnded)) => break,
                        Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, response))) => {
                            source.close();
                            let body = response.text().await.unwrap_or_default();
                            return Err(map_status_error(status, &body, &model));
                        }
                        Some(Err(reqwest_eventsource::Error::Transport(e))) => {
                            source.close();
                            return Err(BackendError::from(e));
                        }
                        Some(Err(e)) => {
                            source.close();
                            return Err(BackendError::Stream(e.to_string()));
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(StreamOutcome {
            output_text,
            response_id: if aborted { None } else { response_id },
            aborted,
        })
    }

    async fn complete(&self, request: CompletionRequest) -> BackendResult<String> {
        let url = self.api_url("/responses");
        let model = request.model.clone();

        let body = ResponsesRequest {
            model: request.model,
            input: request.input,
            instructions: request.instructions,
            previous_response_id: None,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers())
            .json(&body)
            .timeout(COMPLETION_TIMEOUT)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, &text, &model));
        }

        let parsed: ResponsesResponse = response.json().await?;
        log::debug!("OpenAI completion {} finished", parsed.id);

        let content = parsed
            .output
            .iter()
            .filter(|item| item.item_type == "message")
            .flat_map(|item| item.content.iter())
            .filter(|part| part.part_type == "output_text")
            .filter_map(|part| part.text.clone())
            .collect::<Vec<_>>()
            .join("");

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> OpenAiBackend {
        OpenAiBackend::new("https://api.openai.com/v1", "sk-test".to_string())
    }

    #[test]
    fn test_api_url() {
        assert_eq!(
            backend().api_url("/responses"),
            "https://api.openai.com/v1/responses"
        );
        let trailing = OpenAiBackend::new("https://api.openai.com/v1/", "k".to_string());
        assert_eq!(
            trailing.api_url("/responses"),
            "https://api.openai.com/v1/responses"
        );
    }

    #[test]
    fn test_request_serialization_skips_empty_fields() {
        let request = ResponsesRequest {
            model: "gpt-4o-mini".to_string(),
            input: "hi".to_string(),
            instructions: None,
            previous_response_id: None,
            stream: true,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("instructions"));
        assert!(!json.contains("previous_response_id"));
        assert!(json.contains(r#""stream":true"#));
    }

    #[test]
    fn test_request_serialization_with_continuation() {
        let request = ResponsesRequest {
            model: "gpt-4o-mini".to_string(),
            input: "hi again".to_string(),
            instructions: None,
            previous_response_id: Some("resp-1".to_string()),
            stream: true,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""previous_response_id":"resp-1""#));
    }

    #[test]
    fn test_status_error_mapping() {
        let auth_body = r#"{"error":{"type":"authentication_error","message":"bad key"}}"#;
        assert!(matches!(
            map_status_error(reqwest::StatusCode::UNAUTHORIZED, auth_body, "gpt-4o-mini"),
            BackendError::AuthFailed(_)
        ));

        let rate_body = r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#;
        assert!(matches!(
            map_status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, rate_body, "gpt-4o-mini"),
            BackendError::RateLimited
        ));

        assert!(matches!(
            map_status_error(reqwest::StatusCode::BAD_GATEWAY, "oops", "gpt-4o-mini"),
            BackendError::Api(_)
        ));
    }

    #[test]
    fn test_completion_response_parsing() {
        let body = r#"{
            "id": "resp-42",
            "output": [
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Hello "},
                    {"type": "output_text", "text": "there"}
                ]}
            ]
        }"#;

        let parsed: ResponsesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.id, "resp-42");
        let text: String = parsed
            .output
            .iter()
            .flat_map(|i| i.content.iter())
            .filter_map(|p| p.text.clone())
            .collect();
        assert_eq!(text, "Hello there");
    }
}

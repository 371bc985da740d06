// Backend error types
// Maps transport and API failures to stable error codes

use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Request timed out")]
    Timeout,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Chunk delivery failed: {0}")]
    Delivery(String),

    #[error("Invalid backend configuration: {0}")]
    InvalidConfig(String),
}

impl BackendError {
    /// Stable error code for logs and event payloads
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::AuthFailed(_) => "AUTH_FAILED",
            BackendError::ConnectionFailed(_) => "CONNECTION_FAILED",
            BackendError::RateLimited => "RATE_LIMITED",
            BackendError::Timeout => "TIMEOUT",
            BackendError::ModelNotFound(_) => "MODEL_NOT_FOUND",
            BackendError::Api(_) => "API_ERROR",
            BackendError::Parse(_) => "PARSE_ERROR",
            BackendError::Stream(_) => "STREAM_ERROR",
            BackendError::Delivery(_) => "DELIVERY_ERROR",
            BackendError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_connect() {
            BackendError::ConnectionFailed(err.to_string())
        } else {
            BackendError::Api(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(BackendError::RateLimited.code(), "RATE_LIMITED");
        assert_eq!(BackendError::AuthFailed("401".into()).code(), "AUTH_FAILED");
        assert_eq!(BackendError::Timeout.code(), "TIMEOUT");
    }

    #[test]
    fn test_json_error_maps_to_parse() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(BackendError::from(err).code(), "PARSE_ERROR");
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    /// Non-retryable HTTP status from the endpoint.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("LLM request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Response does not match schema: {0}")]
    Schema(String),
}

impl AiError {
    /// Rate limiting, overload and network failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Network(_) => true,
            AiError::Api { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// HTTP 429 and 503 are retried; every other non-2xx status is permanent.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 503)
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        AiError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limit_and_unavailable_are_retryable() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(500));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
    }

    #[test]
    fn parse_errors_are_not_transient() {
        assert!(!AiError::Parse("bad".into()).is_transient());
        assert!(AiError::Network("reset".into()).is_transient());
        assert!(!AiError::Api { status: 500, body: String::new() }.is_transient());
    }
}

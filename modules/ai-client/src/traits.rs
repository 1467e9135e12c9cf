use async_trait::async_trait;

use crate::error::AiError;
use crate::openai::types::ChatRequest;

// =============================================================================
// Transport
// =============================================================================

/// Raw HTTP outcome of a chat-completion POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One POST to `{base_url}/chat/completions`. Returns `Err` only when no HTTP
/// response was received; status handling belongs to the caller.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn post_chat(&self, request: &ChatRequest) -> Result<TransportResponse, AiError>;
}

// =============================================================================
// JsonChat Trait
// =============================================================================

/// `chat(system_prompt, user_prompt, schema_hint) -> structured_json`.
#[async_trait]
pub trait JsonChat: Send + Sync {
    async fn chat_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema_hint: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, AiError>;
}

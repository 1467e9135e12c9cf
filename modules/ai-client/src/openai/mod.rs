mod client;
pub mod schema;
pub mod types;

pub use client::OpenAiClient;
pub use schema::SchemaHint;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::{is_retryable_status, AiError};
use crate::retry::RetryPolicy;
use crate::traits::{ChatTransport, JsonChat};
use crate::util::{strip_code_blocks, truncate_to_char_boundary};
use types::{ChatRequest, ChatResponse, WireMessage};

const STRICT_JSON_HINT: &str = "Return ONLY valid JSON. Do not include markdown fences.";
const RAW_LOG_LIMIT: usize = 500;

// =============================================================================
// OpenAi Agent
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    pub(crate) model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
    transport: Arc<dyn ChatTransport>,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let transport = Arc::new(OpenAiClient::new(&api_key));
        Self {
            api_key,
            model: model.into(),
            temperature: 0.2,
            max_tokens: 1500,
            retry: RetryPolicy::default(),
            transport,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let client = OpenAiClient::new(&self.api_key).with_base_url(&url.into());
        self.transport = Arc::new(client);
        self
    }

    /// Replace the HTTP transport (fakes in tests, custom clients in callers).
    pub fn with_transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Build the two-message request, appending the strict-JSON suffix and
    /// the pretty-printed schema hint to the user content.
    pub fn build_request(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema_hint: Option<&serde_json::Value>,
    ) -> ChatRequest {
        let mut suffix = STRICT_JSON_HINT.to_string();
        if let Some(hint) = schema_hint {
            let pretty = serde_json::to_string_pretty(hint).unwrap_or_else(|_| hint.to_string());
            suffix.push_str("\nSchema hint:\n");
            suffix.push_str(&pretty);
        }

        ChatRequest::new(&self.model)
            .message(WireMessage::system(system_prompt))
            .message(WireMessage::user(format!("{user_prompt}\n\n{suffix}")))
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
    }

    /// POST with bounded retry. 429/503 and network failures back off and
    /// retry; other non-2xx statuses fail immediately.
    pub async fn send_with_retry(&self, request: &ChatRequest) -> Result<ChatResponse, AiError> {
        let mut last = String::new();

        for attempt in 0..self.retry.max_attempts {
            let is_last = attempt + 1 == self.retry.max_attempts;

            match self.transport.post_chat(request).await {
                Ok(resp) if resp.is_success() => {
                    return serde_json::from_str(&resp.body).map_err(|e| {
                        error!(
                            error = %e,
                            raw = truncate_to_char_boundary(&resp.body, RAW_LOG_LIMIT),
                            "Malformed chat completion envelope"
                        );
                        AiError::Parse(e.to_string())
                    });
                }
                Ok(resp) if is_retryable_status(resp.status) => {
                    last = format!("HTTP {}", resp.status);
                    if !is_last {
                        let delay = self.retry.jittered_delay(attempt);
                        warn!(
                            status = resp.status,
                            attempt,
                            delay_secs = delay.as_secs_f64(),
                            "LLM rate limited or overloaded, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(resp) => {
                    error!(
                        status = resp.status,
                        body = truncate_to_char_boundary(&resp.body, RAW_LOG_LIMIT),
                        "LLM error"
                    );
                    return Err(AiError::Api {
                        status: resp.status,
                        body: truncate_to_char_boundary(&resp.body, RAW_LOG_LIMIT).to_string(),
                    });
                }
                Err(e) if e.is_transient() => {
                    last = e.to_string();
                    if !is_last {
                        let delay = self.retry.jittered_delay(attempt);
                        warn!(
                            error = %e,
                            attempt,
                            delay_secs = delay.as_secs_f64(),
                            "LLM network error, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(AiError::RetriesExhausted {
            attempts: self.retry.max_attempts,
            last,
        })
    }

    /// Chat and deserialize into a typed reply, using its schema as the hint.
    pub async fn chat_typed<T: SchemaHint>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<T, AiError> {
        let hint = T::schema_hint();
        let value = self.chat_json(system_prompt, user_prompt, Some(&hint)).await?;
        serde_json::from_value(value).map_err(|e| AiError::Schema(e.to_string()))
    }
}

/// Extract, de-fence and parse the reply content.
pub fn parse_reply_content(content: &str) -> Result<serde_json::Value, AiError> {
    let cleaned = strip_code_blocks(content);
    serde_json::from_str(cleaned).map_err(|e| {
        error!(
            error = %e,
            raw = truncate_to_char_boundary(content, RAW_LOG_LIMIT),
            "Failed to parse LLM JSON"
        );
        AiError::Parse(e.to_string())
    })
}

#[async_trait]
impl JsonChat for OpenAi {
    async fn chat_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema_hint: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, AiError> {
        let request = self.build_request(system_prompt, user_prompt, schema_hint);
        let response = self.send_with_retry(&request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| AiError::Parse("No response content from LLM".into()))?;
        parse_reply_content(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::TransportResponse;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Replays a fixed list of outcomes and records when each call arrived.
    struct ScriptedTransport {
        script: Mutex<Vec<Result<TransportResponse, AiError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(mut script: Vec<Result<TransportResponse, AiError>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn post_chat(&self, _request: &ChatRequest) -> Result<TransportResponse, AiError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(TransportResponse::new(500, "script exhausted")))
        }
    }

    fn ok_reply(content: &str) -> Result<TransportResponse, AiError> {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
        });
        Ok(TransportResponse::new(200, body.to_string()))
    }

    fn status(code: u16) -> Result<TransportResponse, AiError> {
        Ok(TransportResponse::new(code, "busy"))
    }

    fn agent(transport: Arc<ScriptedTransport>) -> OpenAi {
        OpenAi::new("sk-test", "test-model").with_transport(transport)
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_two_unavailable_responses() {
        let transport = ScriptedTransport::new(vec![status(503), status(503), ok_reply("{\"ok\":true}")]);
        let ai = agent(transport.clone());

        let value = ai.chat_json("sys", "user", None).await.unwrap();
        assert_eq!(value["ok"], true);

        let times = transport.call_times();
        assert_eq!(times.len(), 3);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_secs(1));
        assert!(second_gap > first_gap, "{second_gap:?} should exceed {first_gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_status_fails_without_retry() {
        let transport = ScriptedTransport::new(vec![status(500), ok_reply("{}")]);
        let ai = agent(transport.clone());

        let err = ai.chat_json("sys", "user", None).await.unwrap_err();
        assert!(matches!(err, AiError::Api { status: 500, .. }));
        assert_eq!(transport.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_ceiling() {
        let script = (0..10).map(|_| status(429)).collect();
        let transport = ScriptedTransport::new(script);
        let ai = agent(transport.clone());

        let err = ai.chat_json("sys", "user", None).await.unwrap_err();
        assert!(matches!(err, AiError::RetriesExhausted { attempts: 5, .. }));
        assert_eq!(transport.call_times().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_are_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(AiError::Network("connection reset".into())),
            ok_reply("{}"),
        ]);
        let ai = agent(transport.clone());

        assert!(ai.chat_json("sys", "user", None).await.is_ok());
        assert_eq!(transport.call_times().len(), 2);
    }

    #[tokio::test]
    async fn fenced_reply_is_parsed() {
        let transport = ScriptedTransport::new(vec![ok_reply("```json\n{\"callsign\":\"KK7NQN\"}\n```")]);
        let value = agent(transport).chat_json("sys", "user", None).await.unwrap();
        assert_eq!(value["callsign"], "KK7NQN");
    }

    #[tokio::test]
    async fn non_json_reply_is_a_parse_error() {
        let transport = ScriptedTransport::new(vec![ok_reply("Sure! Here is the profile.")]);
        let err = agent(transport).chat_json("sys", "user", None).await.unwrap_err();
        assert!(matches!(err, AiError::Parse(_)));
    }

    #[test]
    fn request_carries_schema_suffix() {
        let ai = OpenAi::new("sk-test", "test-model");
        let hint = serde_json::json!({"summary": "string"});
        let req = ai.build_request("sys", "Callsign: KK7NQN", Some(&hint));

        assert_eq!(req.messages.len(), 2);
        let user = req.messages[1].content.as_deref().unwrap();
        assert!(user.starts_with("Callsign: KK7NQN\n\nReturn ONLY valid JSON."));
        assert!(user.contains("Schema hint:\n{\n  \"summary\": \"string\"\n}"));
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.max_tokens, Some(1500));
    }

    #[test]
    fn test_openai_new() {
        let ai = OpenAi::new("sk-test", "gpt-4o");
        assert_eq!(ai.model, "gpt-4o");
        assert_eq!(ai.api_key, "sk-test");
        assert_eq!(ai.retry_policy().max_attempts, 5);
    }
}

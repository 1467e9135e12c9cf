use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use super::types::ChatRequest;
use crate::error::AiError;
use crate::traits::{ChatTransport, TransportResponse};

pub(crate) const OPENAI_API_URL: &str = "https://api.openai.com/v1";
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// reqwest-backed transport for any OpenAI-compatible endpoint.
pub struct OpenAiClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.to_string(),
            http,
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn headers(&self) -> Result<HeaderMap, AiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| AiError::Config(format!("invalid API key header: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl ChatTransport for OpenAiClient {
    async fn post_chat(&self, request: &ChatRequest) -> Result<TransportResponse, AiError> {
        let url = self.chat_url();

        debug!(model = %request.model, url = %url, "Chat completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OpenAiClient::new("sk-test").with_base_url("http://127.0.0.1:8001/v1/");
        assert_eq!(client.chat_url(), "http://127.0.0.1:8001/v1/chat/completions");
    }

    #[test]
    fn default_url_is_openai() {
        let client = OpenAiClient::new("sk-test");
        assert_eq!(client.chat_url(), "https://api.openai.com/v1/chat/completions");
    }
}

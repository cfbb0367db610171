//! DeepSeek-backed `LlmAdapter`. Chat-completions wire format, Bearer auth,
//! HTTP 451 mapped to the typed `RegionalBlock` variant every caller gates
//! its shadow-mode fallback on.

use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};

use crate::domain::errors::LlmError;
use crate::domain::ports::{LlmAdapter, LlmCompletion};
use crate::infrastructure::http_client_factory::HttpClientFactory;

const DEEPSEEK_URL: &str = "https://api.deepseek.com/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct DeepSeekAdapter {
    client: ClientWithMiddleware,
    api_key: String,
    model: String,
}

impl DeepSeekAdapter {
    pub fn new(api_key: String, model: String) -> Self {
        Self { client: HttpClientFactory::create_client(), api_key, model }
    }
}

#[async_trait]
impl LlmAdapter for DeepSeekAdapter {
    async fn complete(&self, system: &str, user: &str, temperature: f64, max_tokens: u32) -> Result<LlmCompletion, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "system", content: system }, ChatMessage { role: "user", content: user }],
            temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(DEEPSEEK_URL)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(REQUEST_TIMEOUT)
                } else {
                    LlmError::Transient(e.to_string())
                }
            })?;

        if response.status().as_u16() == 451 {
            return Err(LlmError::RegionalBlock);
        }
        if !response.status().is_success() {
            return Err(LlmError::Transient(format!("deepseek returned {}", response.status())));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
        let content = parsed.choices.into_iter().next().map(|c| c.message.content).ok_or_else(|| LlmError::MalformedResponse("empty choices array".to_string()))?;

        Ok(LlmCompletion { content })
    }
}

/// Always-available fallback used when no `DEEPSEEK_API_KEY` is configured,
/// so dependent loops still exercise their shadow path deterministically
/// instead of being wired to nothing.
pub struct UnconfiguredLlmAdapter;

#[async_trait]
impl LlmAdapter for UnconfiguredLlmAdapter {
    async fn complete(&self, _system: &str, _user: &str, _temperature: f64, _max_tokens: u32) -> Result<LlmCompletion, LlmError> {
        Err(LlmError::RegionalBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_adapter_always_reports_regional_block() {
        let adapter = UnconfiguredLlmAdapter;
        let result = adapter.complete("sys", "user", 0.5, 100).await;
        assert!(matches!(result, Err(LlmError::RegionalBlock)));
    }
}

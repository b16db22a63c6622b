//! HTTP transport for OpenAI-compatible chat completion APIs.
//!
//! Compatible with OpenAI, Azure OpenAI, DeepSeek and other providers that
//! speak the `/chat/completions` contract with JSON-mode responses. The
//! transport does a single attempt; retry, repair and budget policy live in
//! the gateway.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::models::{LlmError, TokenUsage};

/// One chat call, already rendered to prompts.
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn chat(&self, call: &ChatCall) -> Result<ChatOutcome, LlmError>;
}

pub struct HttpLlmTransport {
    http_client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpLlmTransport {
    pub fn new(api_base: &str, api_key: &str, model: &str, call_timeout: Duration) -> Self {
        let http_client = Client::builder()
            .timeout(call_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl LlmTransport for HttpLlmTransport {
    async fn chat(&self, call: &ChatCall) -> Result<ChatOutcome, LlmError> {
        let chat_request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: call.system_prompt.clone() },
                ChatMessage { role: "user".to_string(), content: call.user_prompt.clone() },
            ],
            max_tokens: Some(call.max_tokens),
            temperature: Some(call.temperature),
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", self.api_base);

        tracing::debug!("Calling LLM API: {} with model {}", url, self.model);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(30)
                } else {
                    LlmError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ApiError(format!("malformed completion body: {}", e)))?;

        let content = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::ApiError("Empty response from LLM".to_string()))?;

        let usage = chat_response
            .usage
            .map(|u| TokenUsage { input: u.prompt_tokens, output: u.completion_tokens })
            .unwrap_or_default();

        Ok(ChatOutcome { content, usage })
    }
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

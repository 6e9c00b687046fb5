use crate::config::AgentConfig;
use crate::error::{CopilotError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Message in OpenAI chat format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant"
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Text-completion capability used by every generating stage.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CopilotError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": false,
        });

        // Reasoning models only accept max_completion_tokens
        if self.model.starts_with("gpt-5") || self.model.contains("o1") {
            body["max_completion_tokens"] = serde_json::json!(self.max_tokens.max(2000));
        } else {
            body["max_tokens"] = serde_json::json!(self.max_tokens);
        }
        body
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = self.request_body(messages);
        debug!("LLM request: model={}, messages={}", self.model, messages.len());

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| CopilotError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CopilotError::Llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CopilotError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&response_json)
    }
}

/// Pull the assistant text out of a chat-completions response body.
pub fn extract_content(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(CopilotError::Llm(format!("LLM API error: {}", error)));
    }

    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| CopilotError::Llm("No choices array in LLM response".to_string()))?;

    let first = choices
        .first()
        .ok_or_else(|| CopilotError::Llm("Empty choices array in LLM response".to_string()))?;

    match first.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Err(CopilotError::Llm(
                "LLM response was filtered by content policy".to_string(),
            ))
        }
        _ => {}
    }

    let content = first["message"]["content"]
        .as_str()
        .ok_or_else(|| CopilotError::Llm("No content in LLM response".to_string()))?;

    if content.is_empty() {
        return Err(CopilotError::Llm("Empty content in LLM response".to_string()));
    }

    Ok(content.to_string())
}

//! AI chat collaborator used by the rule builder

use crate::core::config::AiConfig;
use crate::core::error::{CuratorError, Result};
use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send the conversation and return the assistant's reply text
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiChatClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl OpenAiChatClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CuratorError::InitializationError(format!("AI HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.3,
        });

        let response = self
            .http_client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CuratorError::ProviderError(format!("AI chat request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CuratorError::ProviderError(format!(
                "AI chat returned status: {}",
                response.status()
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| CuratorError::ProviderError(format!("Invalid AI chat response: {}", e)))?;

        let reply = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CuratorError::ProviderError("AI chat returned no choices".to_string()))?;

        debug!(chars = reply.len(), "AI chat reply received");
        Ok(reply)
    }
}

/// Used when no API key is configured
pub struct DisabledChatClient;

#[async_trait]
impl ChatClient for DisabledChatClient {
    async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
        Err(CuratorError::ProviderError(
            "AI chat is not configured".to_string(),
        ))
    }
}

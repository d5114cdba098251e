//! Minimal client for OpenAI-compatible chat completion APIs.
//!
//! Each call is a single attempt. Retries are the caller's business (see
//! [`crate::retry`]); this client only classifies failures:
//!
//! - 429, 5xx, timeouts and connection errors are transient
//! - other 4xx responses and unparseable bodies are permanent

use crate::errors::ScorerError;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
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

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Chat completion client bound to one model.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ScorerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScorerError::permanent(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` and return the first choice's text.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, ScorerError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                warn!(error = %e, "chat request failed to connect");
                ScorerError::transient(format!("Connection error: {}", e))
            } else {
                ScorerError::permanent(format!("Request error: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ScorerError::permanent(format!("Failed to parse API response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ScorerError::permanent("No choices in API response"))?;

        debug!(model = %self.model, chars = content.len(), "chat completion received");
        Ok(content)
    }
}

/// Map a non-success HTTP status to a scorer error.
pub fn classify_status(status: StatusCode, body: &str) -> ScorerError {
    let message = format!("API error {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        warn!(%status, "retryable API error");
        ScorerError::Transient(message)
    } else {
        ScorerError::Permanent(message)
    }
}

//! OpenAI chat-completions client (JSON mode)

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use csops_common::config::OpenAiConfig;

use super::{check_status, http_client, join_url, IntegrationError};

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self, IntegrationError> {
        Ok(Self {
            http: http_client()?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat completion constrained to a JSON object; returns the raw content
    pub async fn complete_json(&self, system: &str, user: &str) -> Result<String, IntegrationError> {
        debug!(model = %self.model, prompt_len = user.len(), "Requesting chat completion");

        let response = self
            .http
            .post(join_url(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": 0.2,
                "response_format": { "type": "json_object" },
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
            }))
            .send()
            .await?;
        let chat: ChatResponse = check_status(response).await?.json().await?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| IntegrationError::Parse("Empty completion".to_string()))
    }
}

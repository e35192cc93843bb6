//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LlmClient, LlmError, LlmSettings};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

pub struct OpenAiClient {
    http: Client,
    url: String,
    models_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    /// Build a client from settings that passed
    /// [`LlmSettings::readiness_problem`].
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let url = settings
            .chat_completion_url()
            .context("LLM base URL is not configured")?;
        let models_url = settings.models_url().context("LLM base URL is not configured")?;
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self {
            http,
            url,
            models_url,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }

    /// Verify the endpoint answers and serves the configured model.
    pub async fn check_connection(&self) -> Result<(), LlmError> {
        let mut req = self.http.get(&self.models_url);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(LlmError::Status(resp.status().as_u16()));
        }
        let list: ModelList = resp.json().await?;
        if list.data.iter().any(|m| m.id == self.model) {
            Ok(())
        } else {
            Err(LlmError::UnknownModel(self.model.clone()))
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                Message { role: "system", content: system_prompt },
                Message { role: "user", content: user_prompt },
            ],
            response_format: ResponseFormat { kind: "json_object" },
        };

        debug!(url = %self.url, model = %self.model, "Sending chat completion");
        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(LlmError::Status(resp.status().as_u16()));
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::NoChoices)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

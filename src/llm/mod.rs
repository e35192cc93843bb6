//! Language-model access: admin-managed settings, the completion seam,
//! and structured (JSON) responses.

pub mod client;
pub mod prompt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::client::OpenAiClient;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("LLM API returned HTTP {0}")]
    Status(u16),
    #[error("LLM response contained no choices")]
    NoChoices,
    #[error("failed to decode LLM content as JSON: {source} (raw: {raw})")]
    Decode {
        #[source]
        source: serde_json::Error,
        raw: String,
    },
    #[error("model '{0}' is not served by the LLM endpoint")]
    UnknownModel(String),
}

/// Feature flag plus endpoint settings for the analysis LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Master switch for GPU analysis; requests are rejected when off.
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            timeout_secs: 120,
        }
    }
}

impl LlmSettings {
    fn clean_base_url(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }

    /// `<base>/chat/completions`, or `None` when no base URL is set.
    pub fn chat_completion_url(&self) -> Option<String> {
        let base = self.clean_base_url();
        if base.is_empty() {
            return None;
        }
        if base.ends_with("/chat/completions") {
            return Some(base.to_string());
        }
        Some(format!("{}/chat/completions", base))
    }

    pub fn models_url(&self) -> Option<String> {
        let base = self.clean_base_url();
        if base.is_empty() {
            return None;
        }
        let base = base.strip_suffix("/chat/completions").unwrap_or(base);
        Some(format!("{}/models", base))
    }

    /// Why analysis cannot run with these settings, if it cannot.
    pub fn readiness_problem(&self) -> Option<&'static str> {
        if !self.enabled {
            return Some("GPU analysis feature is currently disabled");
        }
        if self.chat_completion_url().is_none() {
            return Some("LLM base URL is not configured");
        }
        None
    }
}

/// One chat completion: a system prompt and a user prompt in, the raw
/// assistant message content out.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;

    /// Model identifier recorded on each finding.
    fn model_name(&self) -> &str;
}

/// Run a completion and decode its content as `T`.
pub async fn complete_json<T: DeserializeOwned>(
    client: &dyn LlmClient,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<T, LlmError> {
    let raw = client.complete(system_prompt, user_prompt).await?;
    serde_json::from_str(clean_json_output(&raw)).map_err(|source| LlmError::Decode { source, raw })
}

/// Strip the Markdown code fences models like to wrap JSON in.
pub fn clean_json_output(content: &str) -> &str {
    let mut s = content.trim();
    s = s.strip_prefix("```json").unwrap_or(s);
    s = s.strip_prefix("```").unwrap_or(s);
    s = s.strip_suffix("```").unwrap_or(s);
    s.trim()
}

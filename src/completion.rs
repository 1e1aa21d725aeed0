//! Completion capability: the [`CompletionModel`] trait and chat providers.
//!
//! - **[`OpenAiChat`]** calls `POST {url}/chat/completions`.
//! - **[`OllamaChat`]** calls `POST {url}/api/chat` with streaming off.
//!
//! The whole rendered prompt is sent as a single user message. Retries
//! follow the same schedule as the embedding providers.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::CompletionConfig;
use crate::embedding::openai_api_key;
use crate::error::{CoderError, Result, Service};
use crate::http::{build_client, send_json};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Maps a prompt string to a response string.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct OpenAiChat {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
    url: String,
    max_retries: u32,
}

impl OpenAiChat {
    /// Fails with [`CoderError::Configuration`] if `OPENAI_API_KEY` is unset.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = openai_api_key()?;
        Ok(Self {
            client: build_client(Service::Completion, config.timeout_secs)?,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl CompletionModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        let value = send_json(
            || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&payload)
            },
            self.max_retries,
            Service::Completion,
            "OpenAI",
        )
        .await?;
        extract_openai_text(&value).ok_or_else(|| missing_text("OpenAI"))
    }
}

fn extract_openai_text(value: &serde_json::Value) -> Option<String> {
    value
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.trim().to_string())
}

pub struct OllamaChat {
    client: Client,
    model: String,
    temperature: f32,
    url: String,
    max_retries: u32,
}

impl OllamaChat {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(Service::Completion, config.timeout_secs)?,
            model: config.model.clone(),
            temperature: config.temperature,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl CompletionModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "stream": false,
            "options": {"temperature": self.temperature},
            "messages": [{"role": "user", "content": prompt}],
        });
        let value = send_json(
            || self.client.post(&url).json(&payload),
            self.max_retries,
            Service::Completion,
            "Ollama",
        )
        .await?;
        value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| missing_text("Ollama"))
    }
}

fn missing_text(label: &str) -> CoderError {
    CoderError::upstream(
        Service::Completion,
        format!("missing text in {} response", label),
    )
}

/// Create the [`CompletionModel`] named by `completion.provider`.
pub fn create_completion_model(config: &CompletionConfig) -> Result<Box<dyn CompletionModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Box::new(OllamaChat::new(config)?)),
        other => Err(CoderError::config(format!(
            "Unknown completion provider: {}",
            other
        ))),
    }
}

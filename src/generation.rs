//! [`AnswerGenerator`] adapters: OpenAI chat completions, or disabled.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use ragvault_core::answer::AnswerGenerator;
use ragvault_core::error::{Result, VaultError};
use ragvault_core::retry::RetryPolicy;

use crate::config::GenerationConfig;
use crate::http::{api_key_from_env, build_client, malformed, send_json};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";

pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(
            OpenAIChatGenerator::new(config).context("OpenAI chat generator")?,
        )),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl AnswerGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(VaultError::configuration("generation provider is disabled"))
    }
}

/// `POST {url}/chat/completions` with a system and a user message.
pub struct OpenAIChatGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    retry: RetryPolicy,
}

impl OpenAIChatGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
        Ok(Self {
            client: build_client("openai", config.timeout_secs)?,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key: api_key_from_env("openai", &config.api_key_env)?,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            },
        })
    }

    async fn request(&self, body: &serde_json::Value) -> Result<String> {
        let json = send_json(
            "openai",
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(body),
        )
        .await?;
        parse_chat_response(&json)
    }
}

#[async_trait]
impl AnswerGenerator for OpenAIChatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
        });
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = json!(max);
        }
        self.retry
            .run("openai.chat", || self.request(&body))
            .await
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| malformed("openai", "missing choices[0].message.content"))
}

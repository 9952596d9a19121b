//! Embedding gateway adapters.
//!
//! Concrete [`EmbeddingGateway`] implementations selected by `[embedding].provider`:
//! - **`hashing`**: offline feature-hashing embedder from the core crate.
//! - **`openai`**: `POST {url}/embeddings` (default `https://api.openai.com/v1`).
//! - **`ollama`**: `POST {url}/api/embed` (default `http://localhost:11434`).
//! - **`disabled`**: every call fails with a configuration error.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use rvault::config::EmbeddingConfig;
//! # use rvault::embedding::create_gateway;
//! let config = EmbeddingConfig::default(); // provider = "hashing"
//! let gateway = create_gateway(&config).unwrap();
//! assert_eq!(gateway.model_name(), "hashing");
//! ```
//!
//! # Retry Strategy
//!
//! The HTTP adapters split input into `batch_size` requests and run each
//! one under a [`RetryPolicy`]:
//! - HTTP 429, 5xx, network errors and timeouts → retry with backoff
//! - other 4xx → fail immediately
//! - backoff: 1s, 2s, 4s, … (exponent capped at 5)

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use ragvault_core::embedding::{EmbeddingGateway, HashingEmbedder};
use ragvault_core::error::{Result, VaultError};
use ragvault_core::retry::RetryPolicy;

use crate::config::EmbeddingConfig;
use crate::http::{api_key_from_env, build_client, malformed, parse_vector, send_json};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Build the gateway named by `config.provider`.
pub fn create_gateway(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingGateway>> {
    let gateway: Arc<dyn EmbeddingGateway> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledGateway),
        "hashing" => {
            let dims = config.resolved_dims().unwrap_or(384);
            Arc::new(HashingEmbedder::new(dims)?)
        }
        "openai" => Arc::new(OpenAIGateway::new(config).context("OpenAI embedding gateway")?),
        "ollama" => Arc::new(OllamaGateway::new(config).context("Ollama embedding gateway")?),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    };
    tracing::debug!(
        provider = %config.provider,
        model = gateway.model_name(),
        dims = gateway.dims(),
        "embedding gateway ready"
    );
    Ok(gateway)
}

// ============ Disabled ============

/// Placeholder for `provider = "disabled"`; every embed call fails.
pub struct DisabledGateway;

#[async_trait]
impl EmbeddingGateway for DisabledGateway {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(VaultError::configuration("embedding provider is disabled"))
    }
}

// ============ OpenAI ============

/// OpenAI (or OpenAI-compatible) embeddings endpoint.
pub struct OpenAIGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    /// Send `dimensions` in the request body (text-embedding-3 models only).
    request_dims: bool,
    batch_size: usize,
    retry: RetryPolicy,
}

impl OpenAIGateway {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .resolved_model()
            .ok_or_else(|| VaultError::configuration("embedding.model required for OpenAI"))?;
        let dims = config
            .resolved_dims()
            .ok_or_else(|| VaultError::configuration("embedding.dims required for OpenAI"))?;
        let api_key = api_key_from_env("openai", &config.api_key_env)?;
        let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);

        Ok(Self {
            client: build_client("openai", config.timeout_secs)?,
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key,
            request_dims: config.dims.is_some() && model.starts_with("text-embedding-3"),
            model,
            dims,
            batch_size: config.batch_size.max(1),
            retry: config.retry_policy(),
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut body = json!({
            "model": self.model,
            "input": texts,
        });
        if self.request_dims {
            body["dimensions"] = json!(self.dims);
        }
        let json = send_json(
            "openai",
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body),
        )
        .await?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAIGateway {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self
                .retry
                .run("openai.embeddings", || self.request(batch))
                .await?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| malformed("openai", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(pos, |i| i as usize);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| malformed("openai", "missing embedding"))?;
        indexed.push((index, parse_vector("openai", embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Local Ollama instance (`ollama pull nomic-embed-text`).
pub struct OllamaGateway {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl OllamaGateway {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| VaultError::configuration("embedding.model required for Ollama"))?;
        let dims = config
            .dims
            .ok_or_else(|| VaultError::configuration("embedding.dims required for Ollama"))?;
        let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);

        Ok(Self {
            client: build_client("ollama", config.timeout_secs)?,
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
            model,
            dims,
            batch_size: config.batch_size.max(1),
            retry: config.retry_policy(),
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.model,
            "input": texts,
        });
        let json = send_json("ollama", self.client.post(&self.endpoint).json(&body)).await?;
        parse_ollama_response(&json)
    }
}

#[async_trait]
impl EmbeddingGateway for OllamaGateway {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self
                .retry
                .run("ollama.embed", || self.request(batch))
                .await?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| malformed("ollama", "missing embeddings array"))?
        .iter()
        .map(|v| parse_vector("ollama", v))
        .collect()
}

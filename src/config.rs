//! TOML configuration.
//!
//! Every section is optional; omitted values fall back to the defaults
//! below. Secrets are never read from the file: each provider names the
//! environment variable that holds its key.
//!
//! ```toml
//! [db]
//! path = "./data/rvault.sqlite"
//!
//! [catalog]
//! max_documents = 10
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [vector_store]
//! provider = "pinecone"
//! host = "https://notes-abc123.svc.us-east1-gcp.pinecone.io"
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ragvault_core::catalog::CatalogSettings;
use ragvault_core::chunk::ChunkingParams;
use ragvault_core::ingest::IngestSettings;
use ragvault_core::retrieval::RetrievalSettings;
use ragvault_core::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/rvault.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    ragvault_core::chunk::DEFAULT_MAX_CHARS
}
fn default_overlap_chars() -> usize {
    ragvault_core::chunk::DEFAULT_OVERLAP_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
    /// Upper bound on chunks read back by `reconcile`.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            max_documents: default_max_documents(),
            scan_limit: default_scan_limit(),
        }
    }
}

fn default_max_documents() -> usize {
    ragvault_core::catalog::DEFAULT_MAX_DOCUMENTS
}
fn default_scan_limit() -> usize {
    ragvault_core::catalog::DEFAULT_SCAN_LIMIT
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    ragvault_core::retrieval::DEFAULT_TOP_K
}
fn default_max_top_k() -> usize {
    ragvault_core::retrieval::DEFAULT_MAX_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_text_chars: default_max_text_chars(),
        }
    }
}

fn default_max_text_chars() -> usize {
    ragvault_core::ingest::DEFAULT_MAX_TEXT_CHARS
}

/// `provider` is one of `hashing`, `openai`, `ollama`, or `disabled`.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible endpoint or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_openai_key_env(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Model name, falling back to the provider's usual default.
    pub fn resolved_model(&self) -> Option<String> {
        self.model.clone().or_else(|| match self.provider.as_str() {
            "openai" => Some("text-embedding-3-small".to_string()),
            "hashing" => Some("hashing".to_string()),
            _ => None,
        })
    }

    /// Vector dimension, falling back to the provider's usual default.
    pub fn resolved_dims(&self) -> Option<usize> {
        self.dims.or(match self.provider.as_str() {
            "openai" => Some(1536),
            "hashing" => Some(384),
            _ => None,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// `provider` is one of `sqlite`, `memory`, or `pinecone`.
#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_store_provider")]
    pub provider: String,
    /// Pinecone index host, e.g. `https://<index>-<project>.svc.<env>.pinecone.io`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_pinecone_key_env")]
    pub api_key_env: String,
    /// Vectors per upsert request.
    #[serde(default = "default_upsert_batch")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            host: None,
            api_key_env: default_pinecone_key_env(),
            upsert_batch_size: default_upsert_batch(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_store_provider() -> String {
    "sqlite".to_string()
}
fn default_pinecone_key_env() -> String {
    "PINECONE_API_KEY".to_string()
}
fn default_upsert_batch() -> usize {
    100
}

/// `provider` is `openai` or `disabled`.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_chat_model(),
            temperature: default_temperature(),
            max_tokens: None,
            url: None,
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout_secs(),
            api_key_env: default_openai_key_env(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_generation_retries() -> u32 {
    2
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Environment variable holding the bearer token. Auth is off when unset.
    #[serde(default = "default_server_key_env")]
    pub api_key_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_key_env: default_server_key_env(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8088".to_string()
}
fn default_server_key_env() -> String {
    "RVAULT_API_KEY".to_string()
}

/// Log levels per target; `RUST_LOG` overrides all of it.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default: String,
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn chunking_params(&self) -> ChunkingParams {
        ChunkingParams {
            max_chars: self.chunking.max_chars,
            overlap_chars: self.chunking.overlap_chars,
        }
    }

    pub fn catalog_settings(&self) -> CatalogSettings {
        CatalogSettings {
            max_documents: self.catalog.max_documents,
            scan_limit: self.catalog.scan_limit,
        }
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            chunking: self.chunking_params(),
            max_text_chars: self.ingest.max_text_chars,
        }
    }

    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            default_top_k: self.retrieval.default_top_k,
            max_top_k: self.retrieval.max_top_k,
        }
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_chars == 0 {
            bail!("chunking.max_chars must be > 0");
        }
        if self.catalog.max_documents == 0 {
            bail!("catalog.max_documents must be > 0");
        }
        if self.catalog.scan_limit == 0 {
            bail!("catalog.scan_limit must be > 0");
        }
        if self.retrieval.default_top_k == 0 || self.retrieval.max_top_k == 0 {
            bail!("retrieval.default_top_k and retrieval.max_top_k must be >= 1");
        }
        if self.ingest.max_text_chars == 0 {
            bail!("ingest.max_text_chars must be > 0");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "hashing" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, or ollama.",
                other
            ),
        }
        if self.embedding.is_enabled() {
            match self.embedding.resolved_dims() {
                Some(d) if d > 0 => {}
                _ => bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                ),
            }
            if self.embedding.resolved_model().is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.batch_size == 0 {
                bail!("embedding.batch_size must be > 0");
            }
        }

        match self.vector_store.provider.as_str() {
            "sqlite" | "memory" => {}
            "pinecone" => {
                if self.vector_store.host.as_deref().map_or(true, str::is_empty) {
                    bail!("vector_store.host is required when provider is 'pinecone'");
                }
            }
            other => bail!(
                "Unknown vector store provider: '{}'. Must be sqlite, memory, or pinecone.",
                other
            ),
        }
        if self.vector_store.upsert_batch_size == 0 {
            bail!("vector_store.upsert_batch_size must be > 0");
        }

        match self.generation.provider.as_str() {
            "disabled" | "openai" => {}
            other => bail!(
                "Unknown generation provider: '{}'. Must be disabled or openai.",
                other
            ),
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            bail!("generation.temperature must be in [0.0, 2.0]");
        }

        Ok(())
    }
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

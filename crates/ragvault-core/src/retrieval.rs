//! Query-side retrieval: embed the query, search the user's namespace.

use std::sync::Arc;

use crate::embedding::{check_dimensions, EmbeddingGateway};
use crate::error::{Result, VaultError};
use crate::ingest::validate_id;
use crate::models::{namespace_for, QueryMatch};
use crate::store::{QueryRequest, VectorStore};

pub const DEFAULT_TOP_K: usize = 8;
pub const DEFAULT_MAX_TOP_K: usize = 100;
pub const MAX_QUERY_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            max_top_k: DEFAULT_MAX_TOP_K,
        }
    }
}

impl RetrievalSettings {
    /// Resolve a caller-supplied `top_k`: `None` takes the default, values
    /// above `max_top_k` are clamped, anything below 1 is rejected.
    pub fn resolve_top_k(&self, top_k: Option<i64>) -> Result<usize> {
        match top_k {
            None => Ok(self.default_top_k.min(self.max_top_k)),
            Some(k) if k < 1 => Err(VaultError::validation(format!(
                "top_k must be >= 1, got {}",
                k
            ))),
            Some(k) => Ok(usize::try_from(k)
                .unwrap_or(usize::MAX)
                .min(self.max_top_k)),
        }
    }
}

pub struct RetrievalCoordinator {
    gateway: Arc<dyn EmbeddingGateway>,
    store: Arc<dyn VectorStore>,
    settings: RetrievalSettings,
}

impl RetrievalCoordinator {
    pub fn new(
        gateway: Arc<dyn EmbeddingGateway>,
        store: Arc<dyn VectorStore>,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        if settings.default_top_k == 0 || settings.max_top_k == 0 {
            return Err(VaultError::configuration(
                "retrieval.default_top_k and retrieval.max_top_k must be > 0",
            ));
        }
        Ok(Self {
            gateway,
            store,
            settings,
        })
    }

    pub fn settings(&self) -> RetrievalSettings {
        self.settings
    }

    /// Top-K chunks for `query` within `user_id`'s namespace, in the order
    /// the store ranks them. A user with no documents gets an empty list.
    pub async fn semantic_search(
        &self,
        user_id: &str,
        query: &str,
        top_k: Option<i64>,
    ) -> Result<Vec<QueryMatch>> {
        validate_id("user_id", user_id)?;
        let query = query.trim();
        if query.is_empty() {
            return Err(VaultError::validation("query must not be empty"));
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(VaultError::validation(format!(
                "query must be at most {} characters",
                MAX_QUERY_CHARS
            )));
        }
        let top_k = self.settings.resolve_top_k(top_k)?;

        let vectors = self.gateway.embed_batch(&[query.to_string()]).await?;
        let mut vectors = check_dimensions(self.gateway.as_ref(), 1, vectors)?;
        let vector = vectors.pop().unwrap_or_default();

        let matches = self
            .store
            .query(
                &namespace_for(user_id),
                &QueryRequest {
                    vector: &vector,
                    top_k,
                    filter: None,
                    include_metadata: true,
                },
            )
            .await?;

        tracing::debug!(
            user_id,
            top_k,
            returned = matches.len(),
            store = self.store.name(),
            "semantic search"
        );
        Ok(matches)
    }
}

//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the narrow interface the pipeline uses to
//! reach a similarity index (Pinecone, SQLite, in-memory). Records live in
//! per-user namespaces; a [`MetadataFilter`] further restricts queries.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorStore::upsert) | Insert or overwrite records by id |
//! | [`query`](VectorStore::query) | Top-K cosine similarity search |
//! | [`delete`](VectorStore::delete) | Remove records by id (absent ids are a no-op) |

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChunkMetadata, QueryMatch, VectorRecord};

/// Equality filter over chunk metadata. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    pub user_id: Option<String>,
    pub item_id: Option<String>,
}

impl MetadataFilter {
    pub fn user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            item_id: None,
        }
    }

    pub fn document(user_id: &str, item_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            item_id: Some(item_id.to_string()),
        }
    }

    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        self.user_id.as_deref().map_or(true, |u| u == meta.user_id)
            && self.item_id.as_deref().map_or(true, |i| i == meta.item_id)
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.item_id.is_none()
    }
}

/// Parameters for a single similarity query.
#[derive(Debug, Clone)]
pub struct QueryRequest<'a> {
    pub vector: &'a [f32],
    pub top_k: usize,
    pub filter: Option<&'a MetadataFilter>,
    pub include_metadata: bool,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Insert or overwrite records. Idempotent per id; last write wins.
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()>;

    /// Return up to `top_k` matches ordered by descending similarity.
    async fn query(&self, namespace: &str, req: &QueryRequest<'_>) -> Result<Vec<QueryMatch>>;

    /// Remove records by id. Unknown ids are ignored.
    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()>;
}

/// Approximate listing of a namespace via a neutral (all-zero) query vector.
///
/// Vector stores offer no "list by filter" primitive, so this issues a
/// top-`limit` query and returns whatever the store hands back. Results are
/// capped at `limit` and may omit records; use it for reconciliation only,
/// never as the source of truth.
pub async fn scan_chunks(
    store: &dyn VectorStore,
    namespace: &str,
    dims: usize,
    filter: &MetadataFilter,
    limit: usize,
) -> Result<Vec<QueryMatch>> {
    let neutral = vec![0.0f32; dims];
    let req = QueryRequest {
        vector: &neutral,
        top_k: limit,
        filter: Some(filter),
        include_metadata: true,
    };
    let matches = store.query(namespace, &req).await?;
    if matches.len() >= limit {
        tracing::warn!(
            store = store.name(),
            namespace,
            limit,
            "chunk scan hit its limit; results may be incomplete"
        );
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(user: &str, item: &str) -> ChunkMetadata {
        ChunkMetadata {
            user_id: user.into(),
            item_id: item.into(),
            title: String::new(),
            ordinal: 0,
            text: String::new(),
            created_at: 0,
            content_hash: String::new(),
            source_confidence: None,
        }
    }

    #[test]
    fn test_filter_matching() {
        let m = meta("u1", "doc");
        assert!(MetadataFilter::default().matches(&m));
        assert!(MetadataFilter::user("u1").matches(&m));
        assert!(!MetadataFilter::user("u2").matches(&m));
        assert!(MetadataFilter::document("u1", "doc").matches(&m));
        assert!(!MetadataFilter::document("u1", "other").matches(&m));
    }
}

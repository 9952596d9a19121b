//! Pinecone data-plane adapter for [`VectorStore`].
//!
//! Talks to an index host directly over REST:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | upsert | `POST {host}/vectors/upsert` |
//! | query  | `POST {host}/query` |
//! | delete | `POST {host}/vectors/delete` |
//!
//! Pinecone returns every numeric metadata value as a float, so chunk
//! metadata is decoded field by field instead of through serde.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use ragvault_core::error::{Result, VaultError};
use ragvault_core::models::{ChunkMetadata, QueryMatch, VectorRecord};
use ragvault_core::retry::RetryPolicy;
use ragvault_core::store::{MetadataFilter, QueryRequest, VectorStore};

use crate::config::VectorStoreConfig;
use crate::http::{api_key_from_env, build_client, malformed, send_json};

const API_VERSION: &str = "2024-07";
const MAX_DELETE_IDS: usize = 1000;

pub struct PineconeStore {
    client: reqwest::Client,
    host: String,
    api_key: String,
    upsert_batch_size: usize,
    retry: RetryPolicy,
}

impl PineconeStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let host = config
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| VaultError::configuration("vector_store.host required for Pinecone"))?;
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host.trim_end_matches('/'))
        };

        Ok(Self {
            client: build_client("pinecone", config.timeout_secs)?,
            host,
            api_key: api_key_from_env("pinecone", &config.api_key_env)?,
            upsert_batch_size: config.upsert_batch_size.max(1),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            },
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        send_json(
            "pinecone",
            self.client
                .post(format!("{}{}", self.host, path))
                .header("Api-Key", &self.api_key)
                .header("X-Pinecone-API-Version", API_VERSION)
                .json(body),
        )
        .await
    }
}

fn filter_json(filter: &MetadataFilter) -> Value {
    let mut clauses = Map::new();
    if let Some(user) = &filter.user_id {
        clauses.insert("user_id".into(), json!({ "$eq": user }));
    }
    if let Some(item) = &filter.item_id {
        clauses.insert("item_id".into(), json!({ "$eq": item }));
    }
    Value::Object(clauses)
}

fn metadata_json(meta: &ChunkMetadata) -> Value {
    let mut m = json!({
        "user_id": meta.user_id,
        "item_id": meta.item_id,
        "title": meta.title,
        "ordinal": meta.ordinal,
        "text": meta.text,
        "preview": meta.preview(),
        "created_at": meta.created_at,
        "content_hash": meta.content_hash,
    });
    if let Some(c) = meta.source_confidence {
        m["source_confidence"] = json!(c);
    }
    m
}

/// Decode metadata written by [`metadata_json`]. Records written by other
/// tools without `text` fall back to their `preview`.
fn parse_metadata(value: &Value) -> Option<ChunkMetadata> {
    let s = |k: &str| value.get(k).and_then(Value::as_str).map(str::to_string);
    let n = |k: &str| value.get(k).and_then(Value::as_f64);

    Some(ChunkMetadata {
        user_id: s("user_id")?,
        item_id: s("item_id")?,
        title: s("title").unwrap_or_default(),
        ordinal: n("ordinal").or_else(|| n("ord")).unwrap_or(0.0) as u32,
        text: s("text").or_else(|| s("preview")).unwrap_or_default(),
        created_at: n("created_at").unwrap_or(0.0) as i64,
        content_hash: s("content_hash").unwrap_or_default(),
        source_confidence: n("source_confidence").map(|c| c as f32),
    })
}

fn parse_matches(json: &Value) -> Result<Vec<QueryMatch>> {
    let matches = json
        .get("matches")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("pinecone", "missing matches array"))?;

    matches
        .iter()
        .map(|m| {
            let id = m
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("pinecone", "match without id"))?;
            Ok(QueryMatch {
                id: id.to_string(),
                score: m.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                metadata: m.get("metadata").and_then(parse_metadata),
            })
        })
        .collect()
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        for batch in records.chunks(self.upsert_batch_size) {
            let vectors: Vec<Value> = batch
                .iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "values": r.values,
                        "metadata": metadata_json(&r.metadata),
                    })
                })
                .collect();
            let body = json!({ "vectors": vectors, "namespace": namespace });
            self.retry
                .run("pinecone.upsert", || self.post("/vectors/upsert", &body))
                .await?;
        }
        Ok(())
    }

    async fn query(&self, namespace: &str, req: &QueryRequest<'_>) -> Result<Vec<QueryMatch>> {
        let mut body = json!({
            "namespace": namespace,
            "vector": req.vector,
            "topK": req.top_k,
            "includeMetadata": req.include_metadata,
            "includeValues": false,
        });
        if let Some(filter) = req.filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter_json(filter);
        }
        let json = self
            .retry
            .run("pinecone.query", || self.post("/query", &body))
            .await?;
        parse_matches(&json)
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
        for batch in ids.chunks(MAX_DELETE_IDS) {
            let body = json!({ "ids": batch, "namespace": namespace });
            self.retry
                .run("pinecone.delete", || self.post("/vectors/delete", &body))
                .await?;
        }
        Ok(())
    }
}

//! Ingestion pipeline: validate → chunk → reserve → embed → stage → publish.
//!
//! A document becomes visible only once every chunk vector has been written
//! and its [`DocumentEntry`] published to the index. Any failure after the
//! staging upsert began deletes the staged ids before the error is
//! returned, so callers never observe a partially ingested document.
//!
//! Chunk ordinals and ids are fixed before the first network call, which
//! keeps retried upserts idempotent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::DocumentCatalog;
use crate::chunk::ChunkingParams;
use crate::embedding::{check_dimensions, EmbeddingGateway};
use crate::error::{Result, VaultError};
use crate::models::{
    chunk_id, namespace_for, ChunkMetadata, DocumentEntry, DocumentSummary, TextChunk,
    VectorRecord,
};

/// Default cap on the characters accepted in one ingestion.
pub const DEFAULT_MAX_TEXT_CHARS: usize = 200_000;
pub const MAX_ID_CHARS: usize = 128;
pub const MAX_TITLE_CHARS: usize = 512;

/// Source of document creation timestamps (Unix milliseconds).
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub user_id: String,
    pub item_id: String,
    pub title: String,
    pub text: String,
    /// OCR confidence of `text`, when it was extracted from an image.
    #[serde(default)]
    pub source_confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub ok: bool,
    /// Chunk ids in ordinal order.
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evicted: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    pub chunking: ChunkingParams,
    pub max_text_chars: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunking: ChunkingParams::default(),
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }
}

/// Validate a user or item identifier: non-empty, bounded, and limited to
/// `[A-Za-z0-9_.:@-]`.
pub fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(VaultError::validation(format!("{} must not be empty", field)));
    }
    if value.chars().count() > MAX_ID_CHARS {
        return Err(VaultError::validation(format!(
            "{} must be at most {} characters",
            field, MAX_ID_CHARS
        )));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '@')))
    {
        return Err(VaultError::validation(format!(
            "{} contains invalid character {:?}",
            field, bad
        )));
    }
    Ok(())
}

fn validate_request(req: &IngestRequest, max_text_chars: usize) -> Result<()> {
    validate_id("user_id", &req.user_id)?;
    validate_id("item_id", &req.item_id)?;
    if req.title.chars().count() > MAX_TITLE_CHARS {
        return Err(VaultError::validation(format!(
            "title must be at most {} characters",
            MAX_TITLE_CHARS
        )));
    }
    if req.text.trim().is_empty() {
        return Err(VaultError::validation("text must not be empty"));
    }
    let len = req.text.chars().count();
    if len > max_text_chars {
        return Err(VaultError::validation(format!(
            "text has {} characters, limit is {}",
            len, max_text_chars
        )));
    }
    if let Some(c) = req.source_confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(VaultError::validation("source_confidence must be in [0, 1]"));
        }
    }
    Ok(())
}

pub struct IngestPipeline {
    gateway: Arc<dyn EmbeddingGateway>,
    catalog: Arc<DocumentCatalog>,
    settings: IngestSettings,
    clock: Arc<dyn Clock>,
}

impl IngestPipeline {
    pub fn new(
        gateway: Arc<dyn EmbeddingGateway>,
        catalog: Arc<DocumentCatalog>,
        settings: IngestSettings,
    ) -> Result<Self> {
        settings.chunking.validate()?;
        if settings.max_text_chars == 0 {
            return Err(VaultError::configuration("ingest.max_text_chars must be > 0"));
        }
        Ok(Self {
            gateway,
            catalog,
            settings,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn catalog(&self) -> &Arc<DocumentCatalog> {
        &self.catalog
    }

    /// Ingest one document, evicting the user's oldest document if the quota
    /// is reached.
    pub async fn ingest(&self, req: &IngestRequest) -> Result<IngestOutcome> {
        validate_request(req, self.settings.max_text_chars)?;

        let chunks = self.settings.chunking.chunk(&req.text)?;
        if chunks.is_empty() {
            return Err(VaultError::validation("text must not be empty"));
        }

        let reservation = self.catalog.reserve(&req.user_id, &req.item_id).await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.gateway.embed_batch(&texts).await?;
        let vectors = check_dimensions(self.gateway.as_ref(), texts.len(), vectors)?;

        let created_at = self.clock.now_millis();
        let records = build_records(req, &chunks, vectors, created_at);
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();

        let namespace = namespace_for(&req.user_id);
        if let Err(e) = self.catalog.store().upsert(&namespace, &records).await {
            tracing::warn!(
                user_id = %req.user_id,
                item_id = %req.item_id,
                error = %e,
                "chunk upsert failed; rolling back"
            );
            self.catalog.rollback(&reservation, &ids).await;
            return Err(e);
        }

        let entry = DocumentEntry {
            summary: DocumentSummary {
                item_id: req.item_id.clone(),
                title: req.title.clone(),
                created_at,
                chunk_count: chunks.len(),
                text_length: chunks.iter().map(|c| c.text.chars().count()).sum(),
            },
            chunk_ids: ids.clone(),
        };

        let evicted = match self.catalog.commit(&reservation, entry).await {
            Ok(evicted) => evicted,
            Err(e) => {
                self.catalog.rollback(&reservation, &ids).await;
                return Err(e);
            }
        };

        tracing::info!(
            user_id = %req.user_id,
            item_id = %req.item_id,
            chunks = ids.len(),
            evicted = evicted.as_deref().unwrap_or(""),
            "ingested document"
        );

        Ok(IngestOutcome {
            ok: true,
            ids,
            evicted,
        })
    }
}

fn build_records(
    req: &IngestRequest,
    chunks: &[TextChunk],
    vectors: Vec<Vec<f32>>,
    created_at: i64,
) -> Vec<VectorRecord> {
    chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, values)| VectorRecord {
            id: chunk_id(&req.item_id, chunk.ordinal),
            values,
            metadata: ChunkMetadata {
                user_id: req.user_id.clone(),
                item_id: req.item_id.clone(),
                title: req.title.clone(),
                ordinal: chunk.ordinal,
                text: chunk.text.clone(),
                created_at,
                content_hash: chunk.hash.clone(),
                source_confidence: req.source_confidence,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSettings;
    use crate::embedding::HashingEmbedder;
    use crate::error::ProviderErrorKind;
    use crate::index::{DocumentIndex, InMemoryDocumentIndex};
    use crate::models::QueryMatch;
    use crate::store::memory::InMemoryVectorStore;
    use crate::store::{QueryRequest, VectorStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Clock that advances by one millisecond per call.
    struct TickClock(AtomicI64);

    impl Clock for TickClock {
        fn now_millis(&self) -> i64 {
            self.0.fetch_add(1, Ordering::SeqCst)
        }
    }

    /// Writes the first record of every upsert, then fails.
    struct FlakyStore {
        inner: InMemoryVectorStore,
    }

    #[async_trait]
    impl VectorStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
            self.inner.upsert(namespace, &records[..1]).await?;
            Err(VaultError::provider("flaky", ProviderErrorKind::Transient, "503"))
        }
        async fn query(&self, namespace: &str, req: &QueryRequest<'_>) -> Result<Vec<QueryMatch>> {
            self.inner.query(namespace, req).await
        }
        async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
            self.inner.delete(namespace, ids).await
        }
    }

    /// In-memory store with faults that tests switch on and off.
    #[derive(Default)]
    struct FaultyStore {
        inner: InMemoryVectorStore,
        /// Write the first record of an upsert, then fail.
        fail_upsert: AtomicBool,
        /// Fail any delete touching an id with this prefix.
        fail_delete_prefix: Mutex<Option<String>>,
    }

    impl FaultyStore {
        fn fail_deletes(&self, prefix: Option<&str>) {
            *self.fail_delete_prefix.lock().unwrap() = prefix.map(str::to_string);
        }
    }

    #[async_trait]
    impl VectorStore for FaultyStore {
        fn name(&self) -> &str {
            "faulty"
        }
        async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
            if self.fail_upsert.load(Ordering::SeqCst) {
                self.inner.upsert(namespace, &records[..1]).await?;
                return Err(VaultError::provider("faulty", ProviderErrorKind::Transient, "503"));
            }
            self.inner.upsert(namespace, records).await
        }
        async fn query(&self, namespace: &str, req: &QueryRequest<'_>) -> Result<Vec<QueryMatch>> {
            self.inner.query(namespace, req).await
        }
        async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
            let prefix = self.fail_delete_prefix.lock().unwrap().clone();
            if let Some(prefix) = prefix {
                if ids.iter().any(|id| id.starts_with(&prefix)) {
                    return Err(VaultError::provider("faulty", ProviderErrorKind::Transient, "503"));
                }
            }
            self.inner.delete(namespace, ids).await
        }
    }

    fn faulty_pipeline(
        max_documents: usize,
    ) -> (Arc<FaultyStore>, Arc<InMemoryDocumentIndex>, IngestPipeline) {
        let store = Arc::new(FaultyStore::default());
        let index = Arc::new(InMemoryDocumentIndex::new());
        let catalog = Arc::new(
            DocumentCatalog::new(
                store.clone(),
                index.clone(),
                CatalogSettings {
                    max_documents,
                    scan_limit: 1000,
                },
            )
            .unwrap(),
        );
        let pipeline = IngestPipeline::new(
            Arc::new(HashingEmbedder::new(32).unwrap()),
            catalog,
            IngestSettings {
                chunking: small_chunks(),
                max_text_chars: 10_000,
            },
        )
        .unwrap()
        .with_clock(Arc::new(TickClock(AtomicI64::new(1_000))));
        (store, index, pipeline)
    }

    struct CountingGateway {
        inner: HashingEmbedder,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingGateway for CountingGateway {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(VaultError::provider(
                    "counting",
                    ProviderErrorKind::Timeout,
                    "deadline exceeded",
                ));
            }
            self.inner.embed_batch(texts).await
        }
    }

    struct Harness {
        store: Arc<InMemoryVectorStore>,
        index: Arc<InMemoryDocumentIndex>,
        gateway: Arc<CountingGateway>,
        pipeline: IngestPipeline,
    }

    fn harness(max_documents: usize, chunking: ChunkingParams, fail_embed: bool) -> Harness {
        let store = Arc::new(InMemoryVectorStore::new());
        let index = Arc::new(InMemoryDocumentIndex::new());
        let gateway = Arc::new(CountingGateway {
            inner: HashingEmbedder::new(128).unwrap(),
            calls: AtomicUsize::new(0),
            fail: fail_embed,
        });
        let catalog = Arc::new(
            DocumentCatalog::new(
                store.clone(),
                index.clone(),
                CatalogSettings {
                    max_documents,
                    scan_limit: 1000,
                },
            )
            .unwrap(),
        );
        let pipeline = IngestPipeline::new(
            gateway.clone(),
            catalog,
            IngestSettings {
                chunking,
                max_text_chars: 10_000,
            },
        )
        .unwrap()
        .with_clock(Arc::new(TickClock(AtomicI64::new(1_000))));
        Harness {
            store,
            index,
            gateway,
            pipeline,
        }
    }

    fn request(user: &str, item: &str, text: &str) -> IngestRequest {
        IngestRequest {
            user_id: user.into(),
            item_id: item.into(),
            title: format!("Title of {}", item),
            text: text.into(),
            source_confidence: None,
        }
    }

    fn small_chunks() -> ChunkingParams {
        ChunkingParams {
            max_chars: 40,
            overlap_chars: 8,
        }
    }

    const LONG_TEXT: &str = "Photosynthesis converts light into chemical energy. \
        Chlorophyll absorbs mostly blue and red light. \
        The Calvin cycle fixes carbon dioxide into sugars. \
        Stomata regulate gas exchange in leaves.";

    #[tokio::test]
    async fn test_ids_are_deterministic_and_ordered() {
        let h = harness(10, small_chunks(), false);
        let out = h.pipeline.ingest(&request("u1", "bio", LONG_TEXT)).await.unwrap();
        assert!(out.ok);
        assert!(out.ids.len() > 1);
        for (i, id) in out.ids.iter().enumerate() {
            assert_eq!(id, &format!("bio_{:04}", i));
        }
        assert_eq!(h.store.len("user_u1"), out.ids.len());
        assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 1);

        let entry = h.index.get("u1", "bio").await.unwrap().unwrap();
        assert_eq!(entry.summary.chunk_count, out.ids.len());
        assert_eq!(entry.chunk_ids, out.ids);
    }

    #[tokio::test]
    async fn test_round_trip_query_by_chunk_text() {
        let h = harness(10, small_chunks(), false);
        let out = h.pipeline.ingest(&request("u1", "bio", LONG_TEXT)).await.unwrap();

        let probe = h.store.ids("user_u1")[2].clone();
        let text = h
            .store
            .query(
                "user_u1",
                &QueryRequest {
                    vector: &vec![0.0; 128],
                    top_k: 100,
                    filter: None,
                    include_metadata: true,
                },
            )
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.id == probe)
            .and_then(|m| m.metadata)
            .unwrap()
            .text;

        let qv = h.gateway.embed(&text).await.unwrap();
        let matches = h
            .store
            .query(
                "user_u1",
                &QueryRequest {
                    vector: &qv,
                    top_k: 3,
                    filter: None,
                    include_metadata: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(matches[0].id, probe);
        assert!(out.ids.contains(&probe));
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_provider_call() {
        let h = harness(10, small_chunks(), false);
        let cases = vec![
            request("", "doc", "text"),
            request("u1", "", "text"),
            request("u1", "bad id", "text"),
            request("u1", "doc", "   \n "),
            request("u1", "doc", &"x".repeat(10_001)),
            IngestRequest {
                source_confidence: Some(1.5),
                ..request("u1", "doc", "text")
            },
            IngestRequest {
                title: "t".repeat(MAX_TITLE_CHARS + 1),
                ..request("u1", "doc", "text")
            },
        ];
        for req in cases {
            let err = h.pipeline.ingest(&req).await.unwrap_err();
            assert_eq!(err.code(), "validation_error", "{:?}", req.item_id);
        }
        assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_eleventh_document_evicts_oldest() {
        let h = harness(10, ChunkingParams::default(), false);
        for i in 1..=10 {
            h.pipeline
                .ingest(&request("u1", &format!("doc{:02}", i), "some text"))
                .await
                .unwrap();
        }
        let out = h
            .pipeline
            .ingest(&request("u1", "doc11", "the newest one"))
            .await
            .unwrap();
        assert_eq!(out.evicted.as_deref(), Some("doc01"));

        let docs = h.pipeline.catalog().list_documents("u1").await.unwrap();
        assert_eq!(docs.len(), 10);
        assert_eq!(docs[0].item_id, "doc11");
        assert!(docs.iter().all(|d| d.item_id != "doc01"));
        assert!(!h.store.ids("user_u1").contains(&"doc01_0000".to_string()));
    }

    #[tokio::test]
    async fn test_reingest_overwrites_without_consuming_quota() {
        let h = harness(2, small_chunks(), false);
        h.pipeline.ingest(&request("u1", "a", LONG_TEXT)).await.unwrap();
        h.pipeline.ingest(&request("u1", "b", "short")).await.unwrap();

        let out = h
            .pipeline
            .ingest(&request("u1", "a", "now much shorter"))
            .await
            .unwrap();
        assert_eq!(out.ids, vec!["a_0000".to_string()]);
        assert!(out.evicted.is_none());

        let mut ids = h.store.ids("user_u1");
        ids.sort();
        assert_eq!(ids, vec!["a_0000".to_string(), "b_0000".to_string()]);
        assert_eq!(h.pipeline.catalog().list_documents("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_upsert_leaves_nothing_visible() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryVectorStore::new(),
        });
        let index = Arc::new(InMemoryDocumentIndex::new());
        let catalog = Arc::new(
            DocumentCatalog::new(store.clone(), index.clone(), CatalogSettings::default()).unwrap(),
        );
        let pipeline = IngestPipeline::new(
            Arc::new(HashingEmbedder::new(32).unwrap()),
            catalog,
            IngestSettings {
                chunking: small_chunks(),
                max_text_chars: 10_000,
            },
        )
        .unwrap();

        let err = pipeline
            .ingest(&request("u1", "doc", LONG_TEXT))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "provider_error");
        assert_eq!(store.inner.len("user_u1"), 0);
        assert!(index.get("u1", "doc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_reingest_removes_previous_version() {
        let (store, index, pipeline) = faulty_pipeline(10);
        let first = pipeline.ingest(&request("u1", "doc", LONG_TEXT)).await.unwrap();
        assert!(first.ids.len() > 1);

        store.fail_upsert.store(true, Ordering::SeqCst);
        let err = pipeline
            .ingest(&request("u1", "doc", "a replacement that fails halfway"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "provider_error");
        assert!(index.get("u1", "doc").await.unwrap().is_none());
        assert_eq!(store.inner.len("user_u1"), 0);
    }

    #[tokio::test]
    async fn test_failed_eviction_rolls_back_new_document() {
        let (store, index, pipeline) = faulty_pipeline(2);
        pipeline.ingest(&request("u1", "a", "first text")).await.unwrap();
        pipeline.ingest(&request("u1", "b", "second text")).await.unwrap();

        store.fail_deletes(Some("a_"));
        let err = pipeline
            .ingest(&request("u1", "c", "third text"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "limit_exceeded");
        assert!(!store.inner.ids("user_u1").iter().any(|id| id.starts_with("c_")));
        assert_eq!(index.count("u1").await.unwrap(), 2);
        assert!(index.get("u1", "a").await.unwrap().is_some());

        store.fail_deletes(None);
        let out = pipeline.ingest(&request("u1", "c", "third text")).await.unwrap();
        assert_eq!(out.evicted.as_deref(), Some("a"));
        assert_eq!(index.count("u1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_cleanup_failure_keeps_chunks_deletable() {
        let (store, index, pipeline) = faulty_pipeline(10);
        let first = pipeline.ingest(&request("u1", "doc", LONG_TEXT)).await.unwrap();
        assert!(first.ids.len() > 1);

        store.fail_deletes(Some("doc_"));
        let err = pipeline
            .ingest(&request("u1", "doc", "now much shorter"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "provider_error");

        // Every chunk that may still exist stays reachable from the index.
        let mut tracked = index.get("u1", "doc").await.unwrap().unwrap().chunk_ids;
        tracked.sort();
        let mut stored = store.inner.ids("user_u1");
        stored.sort();
        assert_eq!(tracked, stored);

        store.fail_deletes(None);
        assert!(pipeline.catalog().delete_document("u1", "doc").await.unwrap());
        assert_eq!(store.inner.len("user_u1"), 0);
        assert!(index.get("u1", "doc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_previous_version() {
        let good = harness(10, small_chunks(), false);
        good.pipeline
            .ingest(&request("u1", "doc", "original text"))
            .await
            .unwrap();

        let failing = IngestPipeline::new(
            Arc::new(CountingGateway {
                inner: HashingEmbedder::new(128).unwrap(),
                calls: AtomicUsize::new(0),
                fail: true,
            }),
            good.pipeline.catalog().clone(),
            IngestSettings::default(),
        )
        .unwrap();
        let err = failing
            .ingest(&request("u1", "doc", "replacement"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "provider_timeout");
        assert!(good.index.get("u1", "doc").await.unwrap().is_some());
        assert_eq!(good.store.len("user_u1"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ingestion_respects_quota() {
        let h = Arc::new(harness(3, ChunkingParams::default(), false));
        let mut tasks = Vec::new();
        for i in 0..12 {
            let h = h.clone();
            tasks.push(tokio::spawn(async move {
                h.pipeline
                    .ingest(&request("u1", &format!("doc{}", i), "concurrent body"))
                    .await
            }));
        }
        for t in tasks {
            assert!(t.await.unwrap().is_ok());
        }
        assert_eq!(h.index.count("u1").await.unwrap(), 3);
        assert_eq!(h.store.len("user_u1"), 3);
    }
}

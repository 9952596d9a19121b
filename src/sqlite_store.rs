//! SQLite-backed [`VectorStore`] and [`DocumentIndex`].
//!
//! Vectors are stored as little-endian f32 BLOBs in `chunk_vectors` and
//! scored with brute-force cosine similarity in Rust, which is plenty for
//! a per-user quota of a few documents. The document index lives in the
//! `documents` table of the same database.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use ragvault_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use ragvault_core::error::{ProviderErrorKind, Result, VaultError};
use ragvault_core::index::DocumentIndex;
use ragvault_core::models::{ChunkMetadata, DocumentEntry, DocumentSummary, QueryMatch, VectorRecord};
use ragvault_core::store::{QueryRequest, VectorStore};

fn db_error(err: sqlx::Error) -> VaultError {
    VaultError::provider("sqlite", ProviderErrorKind::Transient, err.to_string())
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> VaultError {
    VaultError::provider(
        "sqlite",
        ProviderErrorKind::Malformed,
        format!("unreadable {}: {}", what, err),
    )
}

/// SQLite implementation of [`VectorStore`].
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        for record in records {
            let metadata_json = serde_json::to_string(&record.metadata)
                .map_err(|e| corrupt("chunk metadata", e))?;
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (namespace, id, user_id, item_id, ordinal, dims,
                                           embedding, metadata_json, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(namespace, id) DO UPDATE SET
                    user_id = excluded.user_id,
                    item_id = excluded.item_id,
                    ordinal = excluded.ordinal,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    metadata_json = excluded.metadata_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(namespace)
            .bind(&record.id)
            .bind(&record.metadata.user_id)
            .bind(&record.metadata.item_id)
            .bind(record.metadata.ordinal as i64)
            .bind(record.values.len() as i64)
            .bind(vec_to_blob(&record.values))
            .bind(metadata_json)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn query(&self, namespace: &str, req: &QueryRequest<'_>) -> Result<Vec<QueryMatch>> {
        let user_id = req.filter.and_then(|f| f.user_id.as_deref());
        let item_id = req.filter.and_then(|f| f.item_id.as_deref());

        let rows = sqlx::query(
            r#"
            SELECT id, embedding, metadata_json
            FROM chunk_vectors
            WHERE namespace = ?1
              AND (?2 IS NULL OR user_id = ?2)
              AND (?3 IS NULL OR item_id = ?3)
            "#,
        )
        .bind(namespace)
        .bind(user_id)
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(req.vector, &blob_to_vec(&blob));
            let id: String = row.get("id");
            scored.push((score, id, row));
        }
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        scored.truncate(req.top_k);

        scored
            .into_iter()
            .map(|(score, id, row)| {
                let metadata = if req.include_metadata {
                    let json: String = row.get("metadata_json");
                    Some(
                        serde_json::from_str::<ChunkMetadata>(&json)
                            .map_err(|e| corrupt("chunk metadata", e))?,
                    )
                } else {
                    None
                };
                Ok(QueryMatch {
                    id,
                    score,
                    metadata,
                })
            })
            .collect()
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for id in ids {
            sqlx::query("DELETE FROM chunk_vectors WHERE namespace = ? AND id = ?")
                .bind(namespace)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }
}

/// SQLite implementation of [`DocumentIndex`].
pub struct SqliteDocumentIndex {
    pool: SqlitePool,
}

impl SqliteDocumentIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentEntry> {
    let ids_json: String = row.get("chunk_ids_json");
    let chunk_ids: Vec<String> =
        serde_json::from_str(&ids_json).map_err(|e| corrupt("chunk id list", e))?;
    let chunk_count: i64 = row.get("chunk_count");
    let text_length: i64 = row.get("text_length");
    Ok(DocumentEntry {
        summary: DocumentSummary {
            item_id: row.get("item_id"),
            title: row.get("title"),
            created_at: row.get("created_at"),
            chunk_count: chunk_count.max(0) as usize,
            text_length: text_length.max(0) as usize,
        },
        chunk_ids,
    })
}

#[async_trait]
impl DocumentIndex for SqliteDocumentIndex {
    async fn entries(&self, user_id: &str) -> Result<Vec<DocumentEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, title, created_at, chunk_count, text_length, chunk_ids_json
            FROM documents
            WHERE user_id = ?
            ORDER BY created_at DESC, item_id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn get(&self, user_id: &str, item_id: &str) -> Result<Option<DocumentEntry>> {
        let row = sqlx::query(
            r#"
            SELECT item_id, title, created_at, chunk_count, text_length, chunk_ids_json
            FROM documents
            WHERE user_id = ? AND item_id = ?
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn publish(&self, user_id: &str, entry: &DocumentEntry) -> Result<()> {
        let ids_json =
            serde_json::to_string(&entry.chunk_ids).map_err(|e| corrupt("chunk id list", e))?;
        sqlx::query(
            r#"
            INSERT INTO documents (user_id, item_id, title, created_at, chunk_count,
                                   text_length, chunk_ids_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, item_id) DO UPDATE SET
                title = excluded.title,
                created_at = excluded.created_at,
                chunk_count = excluded.chunk_count,
                text_length = excluded.text_length,
                chunk_ids_json = excluded.chunk_ids_json
            "#,
        )
        .bind(user_id)
        .bind(&entry.summary.item_id)
        .bind(&entry.summary.title)
        .bind(entry.summary.created_at)
        .bind(entry.summary.chunk_count as i64)
        .bind(entry.summary.text_length as i64)
        .bind(ids_json)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn remove(&self, user_id: &str, item_id: &str) -> Result<Option<DocumentEntry>> {
        let existing = self.get(user_id, item_id).await?;
        if existing.is_some() {
            sqlx::query("DELETE FROM documents WHERE user_id = ? AND item_id = ?")
                .bind(user_id)
                .bind(item_id)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        }
        Ok(existing)
    }

    async fn count(&self, user_id: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(n.max(0) as usize)
    }
}

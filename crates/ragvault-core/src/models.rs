//! Core data models shared across the ingestion and retrieval pipeline.
//!
//! Documents are never stored on their own: every vector record carries the
//! denormalized [`ChunkMetadata`] of its parent, and a [`DocumentSummary`] is
//! a view over those chunks kept in the [`DocumentIndex`](crate::index::DocumentIndex).

use serde::{Deserialize, Serialize};

/// Number of characters kept in a chunk preview.
pub const PREVIEW_CHARS: usize = 160;

/// Deterministic chunk identifier: `{item_id}_{ordinal:04}`.
///
/// ```rust
/// use ragvault_core::models::chunk_id;
///
/// assert_eq!(chunk_id("notes", 7), "notes_0007");
/// assert_eq!(chunk_id("notes", 12345), "notes_12345");
/// ```
pub fn chunk_id(item_id: &str, ordinal: u32) -> String {
    format!("{}_{:04}", item_id, ordinal)
}

/// Vector-store namespace that isolates one user's records.
pub fn namespace_for(user_id: &str) -> String {
    format!("user_{}", user_id)
}

/// A chunk produced by the chunker, before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Zero-based position within the document.
    pub ordinal: u32,
    /// Segment content.
    pub text: String,
    /// Char offset of the window start within the normalized text.
    pub start: usize,
    /// SHA-256 hex digest of `text`.
    pub hash: String,
}

/// Metadata persisted alongside every chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub user_id: String,
    pub item_id: String,
    pub title: String,
    pub ordinal: u32,
    pub text: String,
    /// Unix milliseconds; identical for every chunk of a document.
    pub created_at: i64,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_confidence: Option<f32>,
}

impl ChunkMetadata {
    /// First [`PREVIEW_CHARS`] characters of the chunk text.
    pub fn preview(&self) -> String {
        self.text.chars().take(PREVIEW_CHARS).collect()
    }
}

/// A single record written to the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A ranked match returned by [`VectorStore::query`](crate::store::VectorStore::query).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChunkMetadata>,
}

/// Document-level view reconstructed from its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub item_id: String,
    pub title: String,
    pub created_at: i64,
    pub chunk_count: usize,
    pub text_length: usize,
}

/// An entry in the explicit document index: the summary plus the ids of
/// every chunk that belongs to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEntry {
    pub summary: DocumentSummary,
    pub chunk_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_zero_padded() {
        assert_eq!(chunk_id("abc", 0), "abc_0000");
        assert_eq!(chunk_id("abc", 42), "abc_0042");
    }

    #[test]
    fn test_namespace() {
        assert_eq!(namespace_for("alice"), "user_alice");
    }

    #[test]
    fn test_preview_truncates_on_chars() {
        let meta = ChunkMetadata {
            user_id: "u".into(),
            item_id: "i".into(),
            title: "t".into(),
            ordinal: 0,
            text: "é".repeat(300),
            created_at: 0,
            content_hash: String::new(),
            source_confidence: None,
        };
        assert_eq!(meta.preview().chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn test_metadata_omits_missing_confidence() {
        let meta = ChunkMetadata {
            user_id: "u".into(),
            item_id: "i".into(),
            title: "t".into(),
            ordinal: 1,
            text: "hello".into(),
            created_at: 5,
            content_hash: "h".into(),
            source_confidence: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("source_confidence").is_none());
        let back: ChunkMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}

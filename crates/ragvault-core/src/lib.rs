//! # RagVault Core
//!
//! Provider-agnostic logic for RagVault: data models, the chunker, the
//! gateway/store/index traits, the per-user document catalog, the ingestion
//! pipeline, semantic retrieval, and grounded answer composition.
//!
//! This crate contains no HTTP client, SQL driver, or filesystem I/O.
//! Concrete providers live in the `rvault` app crate and are injected as
//! `Arc<dyn Trait>` values.
//!
//! ```text
//! text ─▶ chunk ─▶ EmbeddingGateway ─▶ VectorStore.upsert ─▶ DocumentIndex.publish
//! query ─▶ EmbeddingGateway ─▶ VectorStore.query ─▶ AnswerComposer ─▶ AnswerGenerator
//! ```

pub mod answer;
pub mod catalog;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod retrieval;
pub mod retry;
pub mod store;

pub use error::{ProviderErrorKind, Result, VaultError};

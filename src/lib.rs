//! # RagVault
//!
//! A per-user retrieval-augmented knowledge vault. Each user keeps a small,
//! bounded set of documents; text is chunked, embedded, and stored in a
//! vector index, then retrieved to ground answers from a chat model.
//!
//! ## Architecture
//!
//! ```text
//! ingest: text ─▶ chunk ─▶ embed ─▶ VectorStore.upsert ─▶ DocumentIndex.publish
//! query:  text ─▶ embed ─▶ VectorStore.query ─▶ compose context ─▶ chat model
//! ```
//!
//! Provider-agnostic logic lives in `ragvault-core`; this crate holds
//! configuration, logging, provider adapters, SQLite persistence, the CLI,
//! and the HTTP server.
//!
//! ## Quick Start
//!
//! ```bash
//! rvault init
//! rvault ingest --user alice --item notes --file notes.md
//! rvault query --user alice "what did I write about tides?"
//! rvault ask --user alice "summarize my notes on tides"
//! rvault serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`app`] | Composition root |
//! | [`embedding`] | Embedding gateway adapters |
//! | [`generation`] | Answer generator adapters |
//! | [`pinecone`] | Pinecone vector store |
//! | [`sqlite_store`] | SQLite vector store and document index |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
mod http;
pub mod logging;
pub mod migrate;
pub mod pinecone;
pub mod server;
pub mod sqlite_store;

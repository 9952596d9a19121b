//! Composition root: builds every pipeline component once from [`Config`].
//!
//! | `vector_store.provider` | Vector store | Document index |
//! |-------------------------|--------------|----------------|
//! | `memory`   | in-process | in-process |
//! | `sqlite`   | `chunk_vectors` table | `documents` table |
//! | `pinecone` | Pinecone index | `documents` table |

use std::sync::Arc;

use anyhow::Context;
use sqlx::SqlitePool;

use ragvault_core::answer::{AnswerComposer, AnswerGenerator};
use ragvault_core::catalog::DocumentCatalog;
use ragvault_core::embedding::EmbeddingGateway;
use ragvault_core::index::{DocumentIndex, InMemoryDocumentIndex};
use ragvault_core::ingest::IngestPipeline;
use ragvault_core::models::QueryMatch;
use ragvault_core::retrieval::RetrievalCoordinator;
use ragvault_core::store::memory::InMemoryVectorStore;
use ragvault_core::store::VectorStore;

use crate::config::Config;
use crate::db;
use crate::embedding::create_gateway;
use crate::generation::create_generator;
use crate::migrate::migrate_pool;
use crate::pinecone::PineconeStore;
use crate::sqlite_store::{SqliteDocumentIndex, SqliteVectorStore};

pub struct Services {
    pub config: Arc<Config>,
    pub gateway: Arc<dyn EmbeddingGateway>,
    pub catalog: Arc<DocumentCatalog>,
    pub ingest: IngestPipeline,
    pub retrieval: RetrievalCoordinator,
    pub composer: AnswerComposer,
    pool: Option<SqlitePool>,
}

impl Services {
    /// Select adapters from config, open the database if one is needed, and
    /// wire everything together.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let gateway = create_gateway(&config.embedding)?;
        let generator = create_generator(&config.generation)?;

        let (store, index, pool): (Arc<dyn VectorStore>, Arc<dyn DocumentIndex>, _) =
            match config.vector_store.provider.as_str() {
                "memory" => (
                    Arc::new(InMemoryVectorStore::new()),
                    Arc::new(InMemoryDocumentIndex::new()),
                    None,
                ),
                "sqlite" => {
                    let pool = open_pool(config).await?;
                    (
                        Arc::new(SqliteVectorStore::new(pool.clone())),
                        Arc::new(SqliteDocumentIndex::new(pool.clone())),
                        Some(pool),
                    )
                }
                "pinecone" => {
                    let pool = open_pool(config).await?;
                    let store =
                        PineconeStore::new(&config.vector_store).context("Pinecone vector store")?;
                    (
                        Arc::new(store),
                        Arc::new(SqliteDocumentIndex::new(pool.clone())),
                        Some(pool),
                    )
                }
                other => anyhow::bail!("Unknown vector store provider: {}", other),
            };

        tracing::info!(
            embedding = gateway.model_name(),
            dims = gateway.dims(),
            store = store.name(),
            generator = generator.model_name(),
            "services initialized"
        );

        let mut services = Self::assemble(config, gateway, store, index, generator)?;
        services.pool = pool;
        Ok(services)
    }

    /// Wire pre-built adapters together.
    pub fn assemble(
        config: &Config,
        gateway: Arc<dyn EmbeddingGateway>,
        store: Arc<dyn VectorStore>,
        index: Arc<dyn DocumentIndex>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> anyhow::Result<Self> {
        let catalog = Arc::new(DocumentCatalog::new(
            store.clone(),
            index,
            config.catalog_settings(),
        )?);
        let ingest =
            IngestPipeline::new(gateway.clone(), catalog.clone(), config.ingest_settings())?;
        let retrieval =
            RetrievalCoordinator::new(gateway.clone(), store, config.retrieval_settings())?;

        Ok(Self {
            config: Arc::new(config.clone()),
            gateway,
            catalog,
            ingest,
            retrieval,
            composer: AnswerComposer::new(generator),
            pool: None,
        })
    }

    /// Retrieve and answer in one step.
    pub async fn ask(
        &self,
        user_id: &str,
        query: &str,
        top_k: Option<i64>,
    ) -> ragvault_core::Result<(String, Vec<QueryMatch>)> {
        let matches = self.retrieval.semantic_search(user_id, query, top_k).await?;
        let answer = self.composer.answer(query, &matches).await?;
        Ok((answer, matches))
    }

    pub async fn close(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
        }
    }
}

async fn open_pool(config: &Config) -> anyhow::Result<SqlitePool> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool)
        .await
        .context("Failed to apply database migrations")?;
    Ok(pool)
}

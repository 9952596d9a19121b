use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database file and schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Chunk vectors for the local store; metadata is the serialized ChunkMetadata
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            namespace TEXT NOT NULL,
            id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            metadata_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-user document index
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            user_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            title TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            text_length INTEGER NOT NULL,
            chunk_ids_json TEXT NOT NULL,
            PRIMARY KEY (user_id, item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_item ON chunk_vectors(namespace, item_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_created ON documents(user_id, created_at, item_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

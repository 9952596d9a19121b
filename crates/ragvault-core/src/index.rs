//! Explicit per-user document index.
//!
//! The vector store knows nothing about documents; this index records, for
//! each `(user_id, item_id)`, the document summary and the ids of every chunk
//! that belongs to it. Entries are published only after all chunk upserts
//! succeed, so the index is the source of truth for quota, listing, and
//! deletion.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::DocumentEntry;

#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// All entries for a user, in no particular order.
    async fn entries(&self, user_id: &str) -> Result<Vec<DocumentEntry>>;

    /// A single entry, if present.
    async fn get(&self, user_id: &str, item_id: &str) -> Result<Option<DocumentEntry>>;

    /// Insert or replace the entry for `entry.summary.item_id`.
    async fn publish(&self, user_id: &str, entry: &DocumentEntry) -> Result<()>;

    /// Remove an entry, returning it if it existed.
    async fn remove(&self, user_id: &str, item_id: &str) -> Result<Option<DocumentEntry>>;

    /// Number of documents held for a user.
    async fn count(&self, user_id: &str) -> Result<usize> {
        Ok(self.entries(user_id).await?.len())
    }
}

/// `HashMap`-backed index for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryDocumentIndex {
    users: RwLock<HashMap<String, HashMap<String, DocumentEntry>>>,
}

impl InMemoryDocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentIndex for InMemoryDocumentIndex {
    async fn entries(&self, user_id: &str) -> Result<Vec<DocumentEntry>> {
        let guard = self.users.read().unwrap();
        Ok(guard
            .get(user_id)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, user_id: &str, item_id: &str) -> Result<Option<DocumentEntry>> {
        let guard = self.users.read().unwrap();
        Ok(guard.get(user_id).and_then(|docs| docs.get(item_id)).cloned())
    }

    async fn publish(&self, user_id: &str, entry: &DocumentEntry) -> Result<()> {
        let mut guard = self.users.write().unwrap();
        guard
            .entry(user_id.to_string())
            .or_default()
            .insert(entry.summary.item_id.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, user_id: &str, item_id: &str) -> Result<Option<DocumentEntry>> {
        let mut guard = self.users.write().unwrap();
        Ok(guard.get_mut(user_id).and_then(|docs| docs.remove(item_id)))
    }

    async fn count(&self, user_id: &str) -> Result<usize> {
        let guard = self.users.read().unwrap();
        Ok(guard.get(user_id).map_or(0, |docs| docs.len()))
    }
}

//! In-memory [`VectorStore`] for tests and single-process deployments.
//!
//! Namespaces map to `HashMap<id, record>` behind a `std::sync::RwLock`.
//! Queries are brute-force cosine similarity over the namespace.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{QueryMatch, VectorRecord};

use super::{QueryRequest, VectorStore};

/// In-memory store partitioned by namespace.
#[derive(Default)]
pub struct InMemoryVectorStore {
    namespaces: RwLock<HashMap<String, HashMap<String, VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held in `namespace`.
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .unwrap()
            .get(namespace)
            .map_or(0, |ns| ns.len())
    }

    /// Sorted ids currently held in `namespace`.
    pub fn ids(&self, namespace: &str) -> Vec<String> {
        let guard = self.namespaces.read().unwrap();
        let mut ids: Vec<String> = guard
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        let mut guard = self.namespaces.write().unwrap();
        let ns = guard.entry(namespace.to_string()).or_default();
        for r in records {
            ns.insert(r.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn query(&self, namespace: &str, req: &QueryRequest<'_>) -> Result<Vec<QueryMatch>> {
        let guard = self.namespaces.read().unwrap();
        let Some(ns) = guard.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<QueryMatch> = ns
            .values()
            .filter(|r| req.filter.map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| QueryMatch {
                id: r.id.clone(),
                score: cosine_similarity(req.vector, &r.values),
                metadata: req.include_metadata.then(|| r.metadata.clone()),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(req.top_k);
        Ok(matches)
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
        let mut guard = self.namespaces.write().unwrap();
        if let Some(ns) = guard.get_mut(namespace) {
            for id in ids {
                ns.remove(id);
            }
        }
        Ok(())
    }
}

//! Per-user document catalog: quota, eviction, listing, and deletion.
//!
//! The catalog sits on top of the [`DocumentIndex`] (source of truth for
//! which documents exist) and the [`VectorStore`] (where their chunks live).
//!
//! # Admission
//!
//! Every write for a user runs under that user's async mutex. Ingestion
//! calls [`DocumentCatalog::reserve`], which takes the lock and decides
//! admission:
//!
//! - re-ingesting an existing `item_id` needs no new slot;
//! - below `max_documents` the new document is admitted;
//! - at capacity, the oldest document (min `created_at`, ties broken by
//!   `item_id` ascending) is selected as the eviction victim;
//! - otherwise the ingestion fails with [`VaultError::LimitExceeded`].
//!
//! The victim is only deleted in [`DocumentCatalog::commit`], after the new
//! document's chunks were written, and the lock is held until the
//! [`Reservation`] is dropped. Two concurrent ingestions for one user can
//! therefore never both observe a free slot.
//!
//! A user's lock lives in the lock map only while someone holds or waits
//! for it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{Result, VaultError};
use crate::index::DocumentIndex;
use crate::models::{namespace_for, DocumentEntry, DocumentSummary, QueryMatch};
use crate::store::{scan_chunks, MetadataFilter, VectorStore};

/// Default per-user document quota.
pub const DEFAULT_MAX_DOCUMENTS: usize = 10;
/// Default number of records fetched by a reconciliation scan.
pub const DEFAULT_SCAN_LIMIT: usize = 1000;

/// Catalog tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogSettings {
    pub max_documents: usize,
    pub scan_limit: usize,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            max_documents: DEFAULT_MAX_DOCUMENTS,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }
}

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// A held per-user write lock. Dropping the last interested guard removes
/// the user's entry from the lock map.
struct UserGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<AsyncMutex<()>>,
    locks: LockMap,
    user_id: String,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        self.guard.take();
        if let Ok(mut locks) = self.locks.lock() {
            // Waiters clone the Arc under this mutex, so a count of two
            // (map + this guard) means nobody else is queued.
            let unused = locks
                .get(&self.user_id)
                .is_some_and(|l| Arc::ptr_eq(l, &self.lock))
                && Arc::strong_count(&self.lock) == 2;
            if unused {
                locks.remove(&self.user_id);
            }
        }
    }
}

/// Exclusive write slot for one `(user_id, item_id)`.
///
/// Holds the user's lock until dropped.
pub struct Reservation {
    user_id: String,
    item_id: String,
    previous: Option<DocumentEntry>,
    victim: Option<DocumentEntry>,
    _guard: UserGuard,
}

impl Reservation {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// The version being replaced, when re-ingesting an existing document.
    pub fn previous(&self) -> Option<&DocumentEntry> {
        self.previous.as_ref()
    }

    /// The document that will be evicted on commit.
    pub fn victim_id(&self) -> Option<&str> {
        self.victim.as_ref().map(|v| v.summary.item_id.as_str())
    }
}

pub struct DocumentCatalog {
    store: Arc<dyn VectorStore>,
    index: Arc<dyn DocumentIndex>,
    settings: CatalogSettings,
    locks: LockMap,
}

impl DocumentCatalog {
    pub fn new(
        store: Arc<dyn VectorStore>,
        index: Arc<dyn DocumentIndex>,
        settings: CatalogSettings,
    ) -> Result<Self> {
        if settings.max_documents == 0 {
            return Err(VaultError::configuration("catalog.max_documents must be >= 1"));
        }
        if settings.scan_limit == 0 {
            return Err(VaultError::configuration("catalog.scan_limit must be >= 1"));
        }
        Ok(Self {
            store,
            index,
            settings,
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn max_documents(&self) -> usize {
        self.settings.max_documents
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    async fn lock_user(&self, user_id: &str) -> UserGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let mut held = UserGuard {
            guard: None,
            lock,
            locks: self.locks.clone(),
            user_id: user_id.to_string(),
        };
        held.guard = Some(held.lock.clone().lock_owned().await);
        held
    }

    /// Number of users with a live lock entry.
    pub fn locked_users(&self) -> usize {
        self.locks.lock().map_or(0, |locks| locks.len())
    }

    /// True iff the user holds fewer than `max_documents` documents.
    pub async fn can_admit(&self, user_id: &str) -> Result<bool> {
        Ok(self.index.count(user_id).await? < self.settings.max_documents)
    }

    /// The user's documents, newest first (ties: `item_id` ascending).
    pub async fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentSummary>> {
        let entries = self.index.entries(user_id).await?;
        Ok(sorted_summaries(entries))
    }

    /// Delete the user's oldest document. Returns `false` if there is none.
    pub async fn evict_oldest(&self, user_id: &str) -> Result<bool> {
        let _guard = self.lock_user(user_id).await;
        let entries = self.index.entries(user_id).await?;
        match oldest(&entries) {
            Some(victim) => {
                self.delete_entry(user_id, victim).await?;
                tracing::info!(user_id, item_id = %victim.summary.item_id, "evicted oldest document");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete every chunk of a document. Returns `false` if it does not exist.
    pub async fn delete_document(&self, user_id: &str, item_id: &str) -> Result<bool> {
        let _guard = self.lock_user(user_id).await;
        match self.index.get(user_id, item_id).await? {
            Some(entry) => {
                self.delete_entry(user_id, &entry).await?;
                tracing::info!(
                    user_id,
                    item_id,
                    chunks = entry.chunk_ids.len(),
                    "deleted document"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_entry(&self, user_id: &str, entry: &DocumentEntry) -> Result<()> {
        let namespace = namespace_for(user_id);
        if !entry.chunk_ids.is_empty() {
            self.store.delete(&namespace, &entry.chunk_ids).await?;
        }
        self.index.remove(user_id, &entry.summary.item_id).await?;
        Ok(())
    }

    /// Take the user's write lock and decide admission for `item_id`.
    pub async fn reserve(&self, user_id: &str, item_id: &str) -> Result<Reservation> {
        let guard = self.lock_user(user_id).await;

        let previous = self.index.get(user_id, item_id).await?;
        let mut victim = None;

        if previous.is_none() {
            let entries = self.index.entries(user_id).await?;
            let max = self.settings.max_documents;
            if entries.len() >= max {
                let candidate = oldest(&entries).cloned();
                let still_full = entries.len() > max;
                match candidate {
                    Some(v) if !still_full => victim = Some(v),
                    _ => {
                        return Err(VaultError::LimitExceeded {
                            user_id: user_id.to_string(),
                            max_documents: max,
                        })
                    }
                }
            }
        }

        Ok(Reservation {
            user_id: user_id.to_string(),
            item_id: item_id.to_string(),
            previous,
            victim,
            _guard: guard,
        })
    }

    /// Publish a fully written document: drop chunks of the previous version
    /// that no longer exist, evict the reserved victim, and record the
    /// entry. Returns the evicted `item_id`, if any.
    ///
    /// Stale chunks are deleted before publishing; once the new entry
    /// replaces the old one nothing would reference them.
    pub async fn commit(
        &self,
        reservation: &Reservation,
        entry: DocumentEntry,
    ) -> Result<Option<String>> {
        let user_id = reservation.user_id.as_str();

        if let Some(previous) = &reservation.previous {
            let current: HashSet<&String> = entry.chunk_ids.iter().collect();
            let stale: Vec<String> = previous
                .chunk_ids
                .iter()
                .filter(|id| !current.contains(id))
                .cloned()
                .collect();
            if !stale.is_empty() {
                if let Err(e) = self.store.delete(&namespace_for(user_id), &stale).await {
                    tracing::warn!(user_id, stale = stale.len(), error = %e, "stale chunk cleanup failed");
                    return Err(e);
                }
            }
        }

        let evicted = match &reservation.victim {
            Some(victim) => {
                if let Err(e) = self.delete_entry(user_id, victim).await {
                    tracing::warn!(
                        user_id,
                        item_id = %victim.summary.item_id,
                        error = %e,
                        "eviction failed"
                    );
                    return Err(VaultError::LimitExceeded {
                        user_id: user_id.to_string(),
                        max_documents: self.settings.max_documents,
                    });
                }
                tracing::info!(user_id, item_id = %victim.summary.item_id, "evicted oldest document");
                Some(victim.summary.item_id.clone())
            }
            None => None,
        };

        self.index.publish(user_id, &entry).await?;
        Ok(evicted)
    }

    /// Undo a failed write: delete staged chunk ids, and when a previous
    /// version was being overwritten, remove it entirely. Failures are
    /// logged; the original error is what the caller reports.
    ///
    /// If the chunk delete fails while replacing a previous version, that
    /// version's entry is kept and widened to every id that may still exist,
    /// so a later `delete_document` removes all of them. Staged chunks of a
    /// brand-new document are recovered by `reconcile`.
    pub async fn rollback(&self, reservation: &Reservation, staged_ids: &[String]) {
        let user_id = reservation.user_id.as_str();
        let mut ids: Vec<String> = staged_ids.to_vec();
        if let Some(previous) = &reservation.previous {
            let staged: HashSet<&String> = staged_ids.iter().collect();
            ids.extend(
                previous
                    .chunk_ids
                    .iter()
                    .filter(|id| !staged.contains(id))
                    .cloned(),
            );
        }

        if let Err(e) = self.store.delete(&namespace_for(user_id), &ids).await {
            tracing::error!(user_id, item_id = %reservation.item_id, error = %e, "rollback delete failed");
            if let Some(previous) = &reservation.previous {
                let entry = DocumentEntry {
                    summary: previous.summary.clone(),
                    chunk_ids: ids,
                };
                if let Err(e) = self.index.publish(user_id, &entry).await {
                    tracing::error!(user_id, item_id = %reservation.item_id, error = %e, "rollback index update failed");
                }
            }
            return;
        }
        if reservation.previous.is_some() {
            if let Err(e) = self.index.remove(user_id, &reservation.item_id).await {
                tracing::error!(user_id, item_id = %reservation.item_id, error = %e, "rollback index removal failed");
            } else {
                tracing::warn!(
                    user_id,
                    item_id = %reservation.item_id,
                    "previous version removed after failed re-ingest"
                );
            }
        }
    }

    /// Rebuild the user's index entries from chunk metadata in the store.
    ///
    /// Uses an approximate neutral-vector scan capped at `scan_limit`.
    /// Entries missing from the scan are removed only when the scan came
    /// back below its limit (i.e. it saw everything).
    pub async fn reconcile(&self, user_id: &str, dims: usize) -> Result<Vec<DocumentSummary>> {
        let _guard = self.lock_user(user_id).await;
        let matches = scan_chunks(
            self.store.as_ref(),
            &namespace_for(user_id),
            dims,
            &MetadataFilter::user(user_id),
            self.settings.scan_limit,
        )
        .await?;
        let complete = matches.len() < self.settings.scan_limit;
        let rebuilt = group_chunks(&matches);

        if complete {
            let found: HashSet<&str> = rebuilt
                .iter()
                .map(|e| e.summary.item_id.as_str())
                .collect();
            for existing in self.index.entries(user_id).await? {
                if !found.contains(existing.summary.item_id.as_str()) {
                    self.index.remove(user_id, &existing.summary.item_id).await?;
                }
            }
        }
        for entry in &rebuilt {
            self.index.publish(user_id, entry).await?;
        }

        tracing::info!(
            user_id,
            documents = rebuilt.len(),
            chunks = matches.len(),
            complete,
            "reconciled document index"
        );
        Ok(sorted_summaries(rebuilt))
    }
}

/// The entry with minimum `(created_at, item_id)`.
fn oldest(entries: &[DocumentEntry]) -> Option<&DocumentEntry> {
    entries.iter().min_by(|a, b| {
        a.summary
            .created_at
            .cmp(&b.summary.created_at)
            .then_with(|| a.summary.item_id.cmp(&b.summary.item_id))
    })
}

fn sorted_summaries(entries: Vec<DocumentEntry>) -> Vec<DocumentSummary> {
    let mut docs: Vec<DocumentSummary> = entries.into_iter().map(|e| e.summary).collect();
    docs.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    docs
}

/// Group chunk matches into document entries: earliest `created_at`, chunk
/// count, and summed text length per `item_id`. Matches without metadata
/// are skipped.
pub fn group_chunks(matches: &[QueryMatch]) -> Vec<DocumentEntry> {
    let mut docs: BTreeMap<&str, DocumentEntry> = BTreeMap::new();
    for m in matches {
        let Some(meta) = &m.metadata else { continue };
        let entry = docs
            .entry(meta.item_id.as_str())
            .or_insert_with(|| DocumentEntry {
                summary: DocumentSummary {
                    item_id: meta.item_id.clone(),
                    title: meta.title.clone(),
                    created_at: meta.created_at,
                    chunk_count: 0,
                    text_length: 0,
                },
                chunk_ids: Vec::new(),
            });
        entry.summary.created_at = entry.summary.created_at.min(meta.created_at);
        entry.summary.chunk_count += 1;
        entry.summary.text_length += meta.text.chars().count();
        entry.chunk_ids.push(m.id.clone());
    }
    docs.into_values()
        .map(|mut e| {
            e.chunk_ids.sort();
            e
        })
        .collect()
}

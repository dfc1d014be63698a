//! In-memory document store.
//!
//! This module provides [`MemoryStore`], the reference implementation of the
//! [`DocumentStore`] contract. Every operation runs under one `RwLock`, which makes
//! each call trivially atomic and linearizable.
//!
//! ## Limitations
//!
//! - **Single-process only**: State is not shared across process boundaries
//! - **No persistence**: All state is lost when the process exits
//! - **Never conflicts**: Optimistic-concurrency failures cannot happen here; use a
//!   fault-injecting wrapper to exercise retry paths

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{unique_keys, ConditionalUpdate, DocumentStore, Filter, Order, TxnResult};
use crate::error::{Error, Result};
use crate::model::{Document, DocumentKey, WaitingQueue};

/// In-memory store.
///
/// Starts with an empty waiting queue and no vehicles.
///
/// ## Example
///
/// ```rust
/// use carpool_core::store::memory::MemoryStore;
///
/// let store = MemoryStore::new();
/// assert_eq!(store.document_count().unwrap(), 1);
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<DocumentKey, Document>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a lock poison error to a store error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::unavailable("memory store lock poisoned")
}

impl MemoryStore {
    /// Creates a store holding only an empty waiting queue.
    #[must_use]
    pub fn new() -> Self {
        let queue = Document::Queue(WaitingQueue::new());
        Self {
            documents: RwLock::new(BTreeMap::from([(queue.key(), queue)])),
        }
    }

    /// Returns the number of stored documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn document_count(&self) -> Result<usize> {
        let count = {
            let documents = self.documents.read().map_err(poison_err)?;
            documents.len()
        };
        Ok(count)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn conditional_update(&self, update: ConditionalUpdate) -> Result<Option<Document>> {
        let mut documents = self.documents.write().map_err(poison_err)?;

        let Some(key) = update.select(documents.values()).map(Document::key) else {
            drop(documents);
            return Ok(None);
        };

        let Some(doc) = documents.get_mut(&key) else {
            drop(documents);
            return Ok(None);
        };

        // Apply to a copy so a rejected mutation leaves the stored document intact.
        let mut next = doc.clone();
        update.mutation.apply(&mut next)?;
        *doc = next.clone();
        drop(documents);

        Ok(Some(next))
    }

    async fn transaction(&self, steps: Vec<ConditionalUpdate>) -> Result<TxnResult> {
        let mut documents = self.documents.write().map_err(poison_err)?;
        let mut staged: BTreeMap<DocumentKey, Document> = BTreeMap::new();
        let mut images = Vec::with_capacity(steps.len());

        for (step, update) in steps.iter().enumerate() {
            let view = documents
                .iter()
                .map(|(key, doc)| staged.get(key).unwrap_or(doc));

            let Some(selected) = update.select(view) else {
                drop(documents);
                return Ok(TxnResult::Aborted { step });
            };

            let mut next = selected.clone();
            update.mutation.apply(&mut next)?;
            images.push(next.clone());
            staged.insert(next.key(), next);
        }

        documents.extend(staged);
        drop(documents);

        Ok(TxnResult::Committed(images))
    }

    async fn find_all(&self, filter: Filter, order: Order) -> Result<Vec<Document>> {
        let mut result: Vec<Document> = {
            let documents = self.documents.read().map_err(poison_err)?;
            documents
                .values()
                .filter(|doc| filter.matches(doc))
                .cloned()
                .collect()
        };
        result.sort_by(|a, b| order.compare(a, b));
        Ok(result)
    }

    async fn replace_all(&self, documents: Vec<Document>) -> Result<()> {
        unique_keys(&documents)?;
        let replacement: BTreeMap<DocumentKey, Document> =
            documents.into_iter().map(|doc| (doc.key(), doc)).collect();

        {
            let mut current = self.documents.write().map_err(poison_err)?;
            *current = replacement;
        }
        Ok(())
    }
}

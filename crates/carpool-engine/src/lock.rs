//! Sweep lock held on the waiting-queue document.
//!
//! At most one reassignment sweep may run against a store at a time, across every
//! process sharing it. The lock is the `reassigningSince` marker on the queue
//! document, manipulated only through conditional updates:
//!
//! 1. Acquire sets the marker only if it is unset
//! 2. If it is set but older than `stale_after`, the holder is presumed dead and
//!    the marker is overwritten (again conditionally, so only one stealer wins)
//! 3. Release clears the marker only if this holder still owns it
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use carpool_core::MemoryStore;
//! use carpool_engine::lock::SweepLock;
//!
//! # tokio_test::block_on(async {
//! let lock = SweepLock::new(Arc::new(MemoryStore::new()), Duration::from_secs(10));
//! let guard = lock.try_acquire().await?.expect("queue is unmarked");
//! assert!(lock.is_held().await?);
//! guard.release().await?;
//! # Ok::<(), carpool_engine::Error>(())
//! # }).unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ulid::Ulid;

use carpool_core::{
    ConditionalUpdate, DocumentStore, Filter, Mutation, Order, ReassignMarker,
};

use crate::error::Result;

/// Mutual exclusion between reassignment sweeps.
#[derive(Clone)]
pub struct SweepLock {
    store: Arc<dyn DocumentStore>,
    holder_id: String,
    stale_after: Duration,
}

impl std::fmt::Debug for SweepLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepLock")
            .field("holder_id", &self.holder_id)
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}

impl SweepLock {
    /// Creates a lock handle with a fresh holder id.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, stale_after: Duration) -> Self {
        Self {
            store,
            holder_id: Ulid::new().to_string(),
            stale_after,
        }
    }

    /// Returns this handle's holder id.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Tries once to take the lock.
    ///
    /// Returns `None` if another live sweep holds it.
    ///
    /// # Errors
    ///
    /// Returns a store error if an update fails.
    pub async fn try_acquire(&self) -> Result<Option<SweepGuard>> {
        let mark = || Mutation::Mark(ReassignMarker::new(self.holder_id.clone()));

        if self
            .store
            .conditional_update(ConditionalUpdate::new(Filter::QueueUnmarked, mark()))
            .await?
            .is_some()
        {
            return Ok(Some(self.guard()));
        }

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(10));
        let Some(previous) = self.current_holder().await? else {
            return Ok(None);
        };
        let stolen = self
            .store
            .conditional_update(ConditionalUpdate::new(Filter::QueueMarkedBefore(cutoff), mark()))
            .await?;

        if stolen.is_some() {
            tracing::warn!(
                previous_holder = %previous,
                holder = %self.holder_id,
                "took over stale sweep marker"
            );
            return Ok(Some(self.guard()));
        }
        Ok(None)
    }

    /// Returns true if any sweeper currently holds the marker.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn is_held(&self) -> Result<bool> {
        Ok(self.current_holder().await?.is_some())
    }

    /// Clears the marker regardless of holder.
    ///
    /// Operator recovery for a marker left behind by a crashed sweeper that has
    /// not yet aged past `stale_after`. Returns false if nothing was held.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn force_break(&self) -> Result<bool> {
        let Some(holder) = self.current_holder().await? else {
            return Ok(false);
        };
        let cleared = self
            .store
            .conditional_update(ConditionalUpdate::new(
                Filter::QueueMarkedBy(holder.clone()),
                Mutation::Unmark,
            ))
            .await?;
        if cleared.is_some() {
            tracing::warn!(holder = %holder, "sweep marker force-broken");
        }
        Ok(cleared.is_some())
    }

    async fn current_holder(&self) -> Result<Option<String>> {
        let queues = self.store.find_all(Filter::Queue, Order::Unordered).await?;
        Ok(queues
            .iter()
            .filter_map(|doc| doc.as_queue())
            .find_map(|q| q.reassigning_since.as_ref())
            .map(|marker| marker.holder.clone()))
    }

    fn guard(&self) -> SweepGuard {
        SweepGuard {
            store: Arc::clone(&self.store),
            holder_id: self.holder_id.clone(),
            released: false,
        }
    }
}

/// Proof of holding the sweep lock.
///
/// Dropping the guard without [`release`](Self::release) clears the marker in a
/// spawned task when a runtime is available; otherwise the marker ages out.
#[must_use = "the sweep lock is released when the guard is dropped"]
pub struct SweepGuard {
    store: Arc<dyn DocumentStore>,
    holder_id: String,
    released: bool,
}

impl std::fmt::Debug for SweepGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepGuard")
            .field("holder_id", &self.holder_id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl SweepGuard {
    /// Returns the holder id this guard was acquired with.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Clears the marker if this holder still owns it.
    ///
    /// Returns false if the marker had been stolen or broken in the meantime.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails; the marker then ages out.
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        let cleared = self
            .store
            .conditional_update(unmark_update(self.holder_id.clone()))
            .await?;
        if cleared.is_none() {
            tracing::warn!(holder = %self.holder_id, "sweep marker lost before release");
        }
        Ok(cleared.is_some())
    }
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let holder = self.holder_id.clone();
        handle.spawn(async move {
            let _ = store.conditional_update(unmark_update(holder)).await;
        });
    }
}

fn unmark_update(holder: String) -> ConditionalUpdate {
    ConditionalUpdate::new(Filter::QueueMarkedBy(holder), Mutation::Unmark)
}

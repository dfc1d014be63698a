//! Waiting-queue operations.
//!
//! The queue lives in one store document together with the set of active group
//! ids, so each operation here touches a single document and is atomic on its
//! own, even when it runs as a two-step transaction.

use std::sync::Arc;

use carpool_core::{
    ConditionalUpdate, DocumentStore, Filter, Group, GroupId, Mutation, Order, TxnResult,
    WaitingQueue,
};

use crate::error::{Error, Result};

/// Update that claims `group_id`, matching only while no seated or waiting group
/// holds it.
#[must_use]
pub fn admit_update(group_id: GroupId) -> ConditionalUpdate {
    ConditionalUpdate::new(Filter::QueueAdmitting(group_id), Mutation::Admit(group_id))
}

/// Update that releases `group_id` after it left its vehicle.
#[must_use]
pub fn retire_update(group_id: GroupId) -> ConditionalUpdate {
    ConditionalUpdate::new(Filter::Queue, Mutation::Retire(group_id))
}

/// Update that takes exactly this waiting entry off the queue, keeping its id
/// active for the vehicle it moves to.
///
/// An entry with the same id but a different size or arrival does not match.
#[must_use]
pub fn dequeue_update(group: &Group) -> ConditionalUpdate {
    ConditionalUpdate::new(Filter::QueueHolding(group.clone()), Mutation::Dequeue(group.id))
}

/// Update that removes a waiting `group_id` for good and releases the id.
#[must_use]
pub fn withdraw_update(group_id: GroupId) -> ConditionalUpdate {
    ConditionalUpdate::new(Filter::QueueContaining(group_id), Mutation::Withdraw(group_id))
}

/// Handle on the FIFO waiting queue.
#[derive(Clone)]
pub struct WaitingList {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for WaitingList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitingList").finish_non_exhaustive()
    }
}

impl WaitingList {
    /// Creates a handle over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Claims the group's id and appends it at its arrival position, in one step.
    ///
    /// Returns `None` if a seated or waiting group already holds the id.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store holds no queue document, or a store
    /// error if the update fails.
    pub async fn enqueue(&self, group: Group) -> Result<Option<WaitingQueue>> {
        let steps = vec![
            admit_update(group.id),
            ConditionalUpdate::new(Filter::Queue, Mutation::Enqueue(group)),
        ];
        match self.store.transaction(steps).await? {
            TxnResult::Committed(images) => {
                let doc = images
                    .into_iter()
                    .last()
                    .ok_or_else(|| carpool_core::Error::internal("committed transaction without images"))?;
                Ok(Some(doc.into_queue()?))
            }
            // a missing queue also misses step 0; snapshot reports that case
            TxnResult::Aborted { step: 0 } => self.snapshot().await.map(|_| None),
            TxnResult::Aborted { .. } => {
                Err(carpool_core::Error::internal("waiting queue document missing").into())
            }
        }
    }

    /// Removes a waiting group and releases its id.
    ///
    /// Returns false if the group was not waiting.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn remove(&self, group_id: GroupId) -> Result<bool> {
        let removed = self
            .store
            .conditional_update(withdraw_update(group_id))
            .await?;
        Ok(removed.is_some())
    }

    /// Reads the queue document.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store holds no queue document, or a store
    /// error if the read fails.
    pub async fn snapshot(&self) -> Result<WaitingQueue> {
        self.store
            .find_all(Filter::Queue, Order::Unordered)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::from(carpool_core::Error::internal("waiting queue document missing")))
            .and_then(|doc| doc.into_queue().map_err(Error::from))
    }

    /// Returns the waiting groups in arrival order.
    ///
    /// # Errors
    ///
    /// See [`snapshot`](Self::snapshot).
    pub async fn groups(&self) -> Result<Vec<Group>> {
        Ok(self.snapshot().await?.groups)
    }
}

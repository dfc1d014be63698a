//! Pluggable document store for fleet and waiting-queue state.
//!
//! The [`DocumentStore`] trait is the only way the engine touches shared state.
//! Any backend that honours the contract below (in-memory, relational, document
//! database) can sit behind it.
//!
//! ## Design Principles
//!
//! - **Conditional updates**: Select-and-mutate happens in one atomic step, so two
//!   callers can never both observe "enough seats" and both commit
//! - **Closed query vocabulary**: [`Filter`], [`Order`] and [`Mutation`] are plain
//!   data, translatable to SQL `WHERE`/`ORDER BY` or document-database queries
//! - **Shared semantics**: [`Filter::matches`], [`Order::compare`] and
//!   [`Mutation::apply`] define the meaning once for every backend
//!
//! ## Contract
//!
//! | Operation | Guarantee |
//! |-----------|-----------|
//! | `conditional_update` | Atomically picks the first document matching the filter in the requested order, mutates it, returns the post-image |
//! | `transaction` | Runs a sequence of conditional updates; all commit or none do |
//! | `find_all` | Non-transactional bulk read |
//! | `replace_all` | Swaps the entire document set in one step |

pub mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::id::{GroupId, VehicleId};
use crate::model::{Document, DocumentKey, Group, ReassignMarker};

/// Predicate selecting candidate documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every vehicle.
    AnyVehicle,
    /// The vehicle with this id.
    Vehicle(VehicleId),
    /// Vehicles with at least `seats` free seats that do not already carry
    /// `group_id`.
    VehicleFor {
        /// Group about to be seated.
        group_id: GroupId,
        /// Seats it needs.
        seats: u32,
    },
    /// The vehicle where this group is seated.
    VehicleContaining(GroupId),
    /// The waiting queue.
    Queue,
    /// The waiting queue, if this group is in it.
    QueueContaining(GroupId),
    /// The waiting queue, if this exact entry (id, size and arrival) is in it.
    QueueHolding(Group),
    /// The waiting queue, if this id is not held by any seated or waiting group.
    QueueAdmitting(GroupId),
    /// The waiting queue, if no sweep marker is set.
    QueueUnmarked,
    /// The waiting queue, if the marker belongs to this holder.
    QueueMarkedBy(String),
    /// The waiting queue, if the marker was set strictly before this instant.
    QueueMarkedBefore(DateTime<Utc>),
}

impl Filter {
    /// Vehicles that can take this group.
    #[must_use]
    pub const fn vehicle_for(group: &Group) -> Self {
        Self::VehicleFor {
            group_id: group.id,
            seats: group.size,
        }
    }

    /// Returns true if the document satisfies this predicate.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match (self, doc) {
            (Self::AnyVehicle, Document::Vehicle(_)) | (Self::Queue, Document::Queue(_)) => true,
            (Self::Vehicle(id), Document::Vehicle(v)) => v.id == *id,
            (Self::VehicleFor { group_id, seats }, Document::Vehicle(v)) => {
                v.seats_available >= *seats && !v.contains(*group_id)
            }
            (Self::VehicleContaining(group), Document::Vehicle(v)) => v.contains(*group),
            (Self::QueueContaining(group), Document::Queue(q)) => q.contains(*group),
            (Self::QueueHolding(group), Document::Queue(q)) => q.holds(group),
            (Self::QueueAdmitting(group), Document::Queue(q)) => !q.is_active(*group),
            (Self::QueueUnmarked, Document::Queue(q)) => q.reassigning_since.is_none(),
            (Self::QueueMarkedBy(holder), Document::Queue(q)) => q
                .reassigning_since
                .as_ref()
                .is_some_and(|m| &m.holder == holder),
            (Self::QueueMarkedBefore(cutoff), Document::Queue(q)) => q
                .reassigning_since
                .as_ref()
                .is_some_and(|m| m.since < *cutoff),
            _ => false,
        }
    }
}

/// Order in which matching candidates are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Backend order; no guarantee.
    #[default]
    Unordered,
    /// Document key ascending (vehicles by id, queue last).
    ById,
    /// Fewest free seats first, ties by vehicle id ascending.
    TightestFit,
}

impl Order {
    /// Compares two documents under this order.
    #[must_use]
    pub fn compare(self, a: &Document, b: &Document) -> Ordering {
        match self {
            Self::Unordered => Ordering::Equal,
            Self::ById => a.key().cmp(&b.key()),
            Self::TightestFit => match (a, b) {
                (Document::Vehicle(x), Document::Vehicle(y)) => x
                    .seats_available
                    .cmp(&y.seats_available)
                    .then_with(|| x.id.cmp(&y.id)),
                _ => a.key().cmp(&b.key()),
            },
        }
    }
}

/// Change applied to the selected document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Take `group.size` seats and add the group to the occupants.
    Seat(Group),
    /// Remove the group from the occupants and give its seats back.
    Unseat(GroupId),
    /// Append the group to the waiting queue at its arrival position.
    Enqueue(Group),
    /// Remove the group from the waiting queue; its id stays active.
    Dequeue(GroupId),
    /// Remove the group from the waiting queue and release its id.
    Withdraw(GroupId),
    /// Claim the id for a group about to be seated or queued.
    Admit(GroupId),
    /// Release the id of a group that left its vehicle.
    Retire(GroupId),
    /// Set the sweep marker.
    Mark(ReassignMarker),
    /// Clear the sweep marker.
    Unmark,
}

impl Mutation {
    /// Applies the mutation in place and bumps the document version.
    ///
    /// Filters are expected to have established the precondition; this still
    /// re-checks it so a backend bug can never break seat accounting.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the mutation does not fit the document.
    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        match (self, &mut *doc) {
            (Self::Seat(group), Document::Vehicle(v)) => {
                if v.seats_available < group.size {
                    return Err(Error::internal(format!(
                        "vehicle {} has {} seats, group {} needs {}",
                        v.id, v.seats_available, group.id, group.size
                    )));
                }
                if v.contains(group.id) {
                    return Err(Error::internal(format!(
                        "group {} already seated in vehicle {}",
                        group.id, v.id
                    )));
                }
                v.seats_available -= group.size;
                v.occupants.push(group.clone());
            }
            (Self::Unseat(group_id), Document::Vehicle(v)) => {
                let at = v
                    .occupants
                    .iter()
                    .position(|g| g.id == *group_id)
                    .ok_or_else(|| {
                        Error::internal(format!("group {group_id} not seated in vehicle {}", v.id))
                    })?;
                let group = v.occupants.remove(at);
                v.seats_available = v.seats_available.saturating_add(group.size).min(v.capacity);
            }
            (Self::Enqueue(group), Document::Queue(q)) => {
                if !q.insert(group.clone()) {
                    return Err(Error::internal(format!("group {} already waiting", group.id)));
                }
            }
            (Self::Dequeue(group_id), Document::Queue(q)) => {
                q.remove(*group_id)
                    .ok_or_else(|| Error::internal(format!("group {group_id} not waiting")))?;
            }
            (Self::Withdraw(group_id), Document::Queue(q)) => {
                q.remove(*group_id)
                    .ok_or_else(|| Error::internal(format!("group {group_id} not waiting")))?;
                q.active_groups.remove(group_id);
            }
            (Self::Admit(group_id), Document::Queue(q)) => {
                if !q.active_groups.insert(*group_id) {
                    return Err(Error::internal(format!("group {group_id} already active")));
                }
            }
            (Self::Retire(group_id), Document::Queue(q)) => {
                q.active_groups.remove(group_id);
            }
            (Self::Mark(marker), Document::Queue(q)) => {
                q.reassigning_since = Some(marker.clone());
            }
            (Self::Unmark, Document::Queue(q)) => {
                q.reassigning_since = None;
            }
            (mutation, doc) => {
                return Err(Error::internal(format!(
                    "mutation {mutation:?} does not apply to {:?}",
                    doc.key()
                )));
            }
        }
        doc.bump_version();
        Ok(())
    }
}

/// One atomic select-and-mutate step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalUpdate {
    /// Which documents qualify.
    pub filter: Filter,
    /// Which qualifying document is picked.
    pub order: Order,
    /// What happens to it.
    pub mutation: Mutation,
}

impl ConditionalUpdate {
    /// Creates an update over unordered candidates.
    #[must_use]
    pub fn new(filter: Filter, mutation: Mutation) -> Self {
        Self {
            filter,
            order: Order::Unordered,
            mutation,
        }
    }

    /// Sets the candidate order.
    #[must_use]
    pub const fn ordered(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Picks the target among `docs`, honouring filter and order.
    ///
    /// The first document wins among equals, so backends iterating in key
    /// order get deterministic choices even for [`Order::Unordered`].
    pub fn select<'a, I>(&self, docs: I) -> Option<&'a Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        docs.into_iter()
            .filter(|doc| self.filter.matches(doc))
            .min_by(|a, b| self.order.compare(a, b))
    }
}

/// Outcome of a multi-step transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnResult {
    /// Every step matched; post-images in step order.
    Committed(Vec<Document>),
    /// A step matched nothing; nothing was written.
    Aborted {
        /// Index of the first step that matched nothing.
        step: usize,
    },
}

impl TxnResult {
    /// Returns true if the transaction committed.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Storage abstraction for vehicles and the waiting queue.
///
/// Implementations must provide:
/// - Atomicity of each conditional update with respect to every other caller,
///   including callers in other processes sharing the same backend
/// - All-or-nothing transactions
/// - An atomic `replace_all` with no observable partial state
///
/// Backends with optimistic concurrency report a lost race as
/// [`Error::Conflict`]; unreachable backends report [`Error::StoreUnavailable`].
/// Callers retry the former and propagate the latter.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` so the store can be shared as
/// `Arc<dyn DocumentStore>` across request tasks and the sweep worker.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Atomically mutates the first matching document.
    ///
    /// # Returns
    ///
    /// - `Some(post_image)` if a document matched and was mutated
    /// - `None` if nothing matched
    async fn conditional_update(&self, update: ConditionalUpdate) -> Result<Option<Document>>;

    /// Runs the steps as one transaction.
    ///
    /// Later steps observe the effects of earlier ones.
    async fn transaction(&self, steps: Vec<ConditionalUpdate>) -> Result<TxnResult>;

    /// Reads every matching document, sorted by `order`.
    async fn find_all(&self, filter: Filter, order: Order) -> Result<Vec<Document>>;

    /// Discards every document and installs `documents` in one step.
    async fn replace_all(&self, documents: Vec<Document>) -> Result<()>;
}

/// Returns the keys of `documents`, rejecting duplicates.
///
/// # Errors
///
/// Returns an invalid-input error naming the first duplicate key.
pub fn unique_keys(documents: &[Document]) -> Result<Vec<DocumentKey>> {
    let mut keys: Vec<DocumentKey> = documents.iter().map(Document::key).collect();
    keys.sort();
    if let Some(w) = keys.windows(2).find(|w| w[0] == w[1]) {
        return Err(Error::InvalidInput(format!("duplicate document {:?}", w[0])));
    }
    Ok(keys)
}

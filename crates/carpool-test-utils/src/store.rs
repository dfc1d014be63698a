//! Store wrapper with fault injection and operation tracing.
//!
//! [`FaultyStore`] delegates to a [`MemoryStore`] but can be told to fail the next
//! calls of a given kind, to delay every call, or to slip a competing writer's
//! transaction in right before the next transaction. Every call is recorded for
//! assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use carpool_core::error::{Error, Result};
use carpool_core::{
    ConditionalUpdate, Document, DocumentStore, Filter, MemoryStore, Mutation, Order, TxnResult,
};

/// Kind of store call, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// `conditional_update`.
    ConditionalUpdate,
    /// `transaction`.
    Transaction,
    /// `find_all`.
    FindAll,
    /// `replace_all`.
    ReplaceAll,
}

/// Failure to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// An optimistic-concurrency conflict.
    Conflict,
    /// The backend is unreachable.
    Unavailable,
}

impl Fault {
    fn to_error(self, kind: OpKind) -> Error {
        match self {
            Self::Conflict => Error::conflict(format!("injected conflict on {kind:?}")),
            Self::Unavailable => Error::unavailable(format!("injected outage on {kind:?}")),
        }
    }
}

/// Record of a store call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// A conditional update.
    ConditionalUpdate {
        /// Filter used.
        filter: Filter,
        /// Mutation requested.
        mutation: Mutation,
        /// Whether a document matched.
        matched: bool,
    },
    /// A transaction.
    Transaction {
        /// Number of steps.
        steps: usize,
        /// Whether it committed.
        committed: bool,
    },
    /// A bulk read.
    FindAll {
        /// Filter used.
        filter: Filter,
    },
    /// A full replacement.
    ReplaceAll {
        /// Number of documents installed.
        documents: usize,
    },
    /// A call failed by injection.
    Injected {
        /// The call that failed.
        kind: OpKind,
        /// The injected failure.
        fault: Fault,
    },
}

/// In-memory store with fault injection and operation recording.
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    faults: Arc<Mutex<HashMap<OpKind, VecDeque<Fault>>>>,
    interleave: Arc<Mutex<VecDeque<Vec<ConditionalUpdate>>>>,
    latency: Option<Duration>,
}

impl FaultyStore {
    /// Creates a store holding only an empty waiting queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that sleeps before every call.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Fails the next `times` calls of `kind` with `fault`.
    pub fn inject(&self, kind: OpKind, fault: Fault, times: usize) {
        let mut faults = self.faults.lock().expect("lock");
        faults
            .entry(kind)
            .or_default()
            .extend(std::iter::repeat(fault).take(times));
    }

    /// Clears all pending injected faults.
    pub fn clear_faults(&self) {
        self.faults.lock().expect("lock").clear();
    }

    /// Applies `update` directly to the wrapped store immediately before the
    /// next transaction, simulating a competing writer winning the race.
    pub fn before_next_transaction(&self, update: ConditionalUpdate) {
        self.before_next_transaction_run(vec![update]);
    }

    /// Like [`before_next_transaction`](Self::before_next_transaction), but the
    /// competing writer commits several steps as one transaction.
    ///
    /// Queued competitors are consumed one per intercepted transaction.
    pub fn before_next_transaction_run(&self, steps: Vec<ConditionalUpdate>) {
        self.interleave.lock().expect("lock").push_back(steps);
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Counts injected failures that have fired.
    pub fn injected_count(&self) -> usize {
        self.operations()
            .iter()
            .filter(|op| matches!(op, StoreOp::Injected { .. }))
            .count()
    }

    fn record(&self, op: StoreOp) {
        self.operations.lock().expect("lock").push(op);
    }

    async fn enter(&self, kind: OpKind) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let fault = self
            .faults
            .lock()
            .expect("lock")
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        if let Some(fault) = fault {
            self.record(StoreOp::Injected { kind, fault });
            return Err(fault.to_error(kind));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for FaultyStore {
    async fn conditional_update(&self, update: ConditionalUpdate) -> Result<Option<Document>> {
        self.enter(OpKind::ConditionalUpdate).await?;
        let filter = update.filter.clone();
        let mutation = update.mutation.clone();
        let result = self.inner.conditional_update(update).await?;
        self.record(StoreOp::ConditionalUpdate {
            filter,
            mutation,
            matched: result.is_some(),
        });
        Ok(result)
    }

    async fn transaction(&self, steps: Vec<ConditionalUpdate>) -> Result<TxnResult> {
        self.enter(OpKind::Transaction).await?;
        let competing = self.interleave.lock().expect("lock").pop_front();
        if let Some(steps) = competing {
            let landed = self.inner.transaction(steps).await?;
            tracing::debug!(committed = landed.is_committed(), "competing writer ran");
        }
        let count = steps.len();
        let result = self.inner.transaction(steps).await?;
        self.record(StoreOp::Transaction {
            steps: count,
            committed: result.is_committed(),
        });
        Ok(result)
    }

    async fn find_all(&self, filter: Filter, order: Order) -> Result<Vec<Document>> {
        self.enter(OpKind::FindAll).await?;
        self.record(StoreOp::FindAll {
            filter: filter.clone(),
        });
        self.inner.find_all(filter, order).await
    }

    async fn replace_all(&self, documents: Vec<Document>) -> Result<()> {
        self.enter(OpKind::ReplaceAll).await?;
        self.record(StoreOp::ReplaceAll {
            documents: documents.len(),
        });
        self.inner.replace_all(documents).await
    }
}

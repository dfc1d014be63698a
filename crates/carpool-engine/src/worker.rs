//! Background sweep worker.
//!
//! Dropoffs never run a sweep themselves. They call [`SweepTrigger::request`],
//! which drops a token into a small bounded queue and returns immediately; a
//! single worker task drains the queue and runs one sweep per token. When the
//! queue is full the request coalesces into the pending token: that sweep has not
//! started yet, so it will still see whatever capacity the request freed.
//!
//! Progress is published on a `watch` channel so callers can wait for the sweep
//! covering a given request without polling the store:
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use carpool_core::MemoryStore;
//! use carpool_engine::lock::SweepLock;
//! use carpool_engine::retry::RetryPolicy;
//! use carpool_engine::sweep::Sweeper;
//! use carpool_engine::worker::SweepWorker;
//!
//! let store = Arc::new(MemoryStore::new());
//! let lock = SweepLock::new(store.clone(), Duration::from_secs(10));
//! let worker = SweepWorker::spawn(Sweeper::new(store, lock, RetryPolicy::default()), 1);
//!
//! let ticket = worker.trigger().request();
//! let report = worker.handle().wait_for(ticket).await.expect("worker running");
//! assert!(report.seated.is_empty());
//! worker.shutdown().await;
//! # });
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::sweep::{SweepReport, Sweeper};

/// Snapshot of worker progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepProgress {
    /// Highest request ticket a finished sweep is known to cover.
    pub covered: u64,
    /// Number of sweeps finished.
    pub completed: u64,
    /// Report of the most recent sweep.
    pub last: Option<SweepReport>,
}

/// Requests sweeps from the worker.
#[derive(Debug, Clone)]
pub struct SweepTrigger {
    tx: mpsc::Sender<()>,
    requested: Arc<AtomicU64>,
}

impl SweepTrigger {
    /// Asks for a sweep and returns a ticket identifying the request.
    ///
    /// Never blocks. If the worker has stopped the request is dropped.
    pub fn request(&self) -> u64 {
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        match self.tx.try_send(()) {
            Ok(()) => tracing::trace!(ticket, "sweep requested"),
            Err(TrySendError::Full(())) => tracing::trace!(ticket, "sweep request coalesced"),
            Err(TrySendError::Closed(())) => {
                tracing::debug!(ticket, "sweep worker stopped, request dropped");
            }
        }
        ticket
    }

    /// Returns the ticket of the most recent request.
    #[must_use]
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Observes sweep progress.
#[derive(Debug, Clone)]
pub struct SweepHandle {
    progress: watch::Receiver<SweepProgress>,
    requested: Arc<AtomicU64>,
}

impl SweepHandle {
    /// Returns the most recent sweep report.
    #[must_use]
    pub fn latest(&self) -> Option<SweepReport> {
        self.progress.borrow().last.clone()
    }

    /// Returns the number of sweeps finished so far.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.progress.borrow().completed
    }

    /// Waits until a sweep that started after request `ticket` has finished.
    ///
    /// Returns that sweep's report, or `None` if the worker stopped first.
    pub async fn wait_for(&self, ticket: u64) -> Option<SweepReport> {
        let mut progress = self.progress.clone();
        let snapshot = progress.wait_for(|p| p.covered >= ticket).await.ok()?;
        snapshot.last.clone()
    }

    /// Waits until every request made so far has been covered by a sweep.
    pub async fn settled(&self) -> Option<SweepReport> {
        let ticket = self.requested.load(Ordering::SeqCst);
        if ticket == 0 {
            return self.latest();
        }
        self.wait_for(ticket).await
    }

    /// Waits until at least `n` sweeps have finished in total.
    pub async fn wait_for_sweeps(&self, n: u64) -> Option<SweepReport> {
        let mut progress = self.progress.clone();
        let snapshot = progress.wait_for(|p| p.completed >= n).await.ok()?;
        snapshot.last.clone()
    }
}

/// The running worker task with its trigger and progress handle.
#[derive(Debug)]
pub struct SweepWorker {
    trigger: SweepTrigger,
    handle: SweepHandle,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweepWorker {
    /// Spawns the worker on the current runtime.
    ///
    /// `queue_depth` is the number of pending requests held before new ones
    /// coalesce; it is raised to 1 if zero.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn(sweeper: Sweeper, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let (progress_tx, progress_rx) = watch::channel(SweepProgress::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let requested = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run(
            sweeper,
            rx,
            Arc::clone(&requested),
            progress_tx,
            shutdown_rx,
        ));

        Self {
            trigger: SweepTrigger {
                tx,
                requested: Arc::clone(&requested),
            },
            handle: SweepHandle {
                progress: progress_rx,
                requested,
            },
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Returns a trigger for requesting sweeps.
    #[must_use]
    pub fn trigger(&self) -> SweepTrigger {
        self.trigger.clone()
    }

    /// Returns a handle for observing progress.
    #[must_use]
    pub fn handle(&self) -> SweepHandle {
        self.handle.clone()
    }

    /// Stops the worker after its current sweep and waits for it to exit.
    ///
    /// Requests still queued are not run.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "sweep worker ended abnormally");
        }
    }
}

async fn run(
    sweeper: Sweeper,
    mut requests: mpsc::Receiver<()>,
    requested: Arc<AtomicU64>,
    progress: watch::Sender<SweepProgress>,
    mut shutdown: oneshot::Receiver<()>,
) {
    tracing::debug!("sweep worker started");

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            request = requests.recv() => {
                if request.is_none() {
                    break;
                }
            }
        }

        let covered = requested.load(Ordering::SeqCst);
        let report = sweeper.sweep().await;

        progress.send_modify(|p| {
            p.covered = p.covered.max(covered);
            p.completed += 1;
            p.last = Some(report);
        });
    }

    tracing::debug!("sweep worker stopped");
}

//! Bounded worker pool for file tasks.
//!
//! A counting semaphore caps concurrent file tasks; a [`TaskTracker`] keeps
//! every spawned task (file tasks and ack waiters) so shutdown can drain or
//! knowingly abandon them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;

/// Permission to run one file task.
///
/// Released when dropped, including when the task that owns it panics.
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

/// A fixed-capacity pool of worker slots plus the set of spawned tasks.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    capacity: usize,
}

impl WorkerPool {
    /// Creates a pool with `capacity` slots. Zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            tracker: TaskTracker::new(),
            capacity,
        }
    }

    /// Waits for a free slot.
    ///
    /// Returns `None` once the pool is closed.
    pub async fn acquire(&self) -> Option<WorkerSlot> {
        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .ok()
            .map(|permit| WorkerSlot { _permit: permit })
    }

    /// Runs `task` on the runtime, holding `slot` until it finishes.
    pub fn spawn<F>(&self, slot: WorkerSlot, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(async move {
            let _slot = slot;
            task.await;
        });
    }

    /// The tracker shared with tasks that need no slot, such as ack waiters.
    #[must_use]
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Total number of slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Tracked tasks still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stops handing out slots. Running tasks are unaffected.
    pub fn close(&self) {
        self.slots.close();
        self.tracker.close();
    }

    /// Closes the pool and waits up to `timeout` for tracked tasks.
    ///
    /// Returns `true` if every task finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.close();
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }
}

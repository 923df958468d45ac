//! The watch event loop: change notifications in, file tasks out.
//!
//! Events are handled strictly in the order the watcher emits them. A
//! create or write of a regular file waits for a worker slot and then runs
//! on its own task, so completion order across files is unspecified.

use std::sync::Arc;

use otf_watcher::{WatchError, WatchEvents, WatchSignal};
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::pool::WorkerPool;
use crate::processor::FileProcessor;
use crate::stats::PipelineStats;

/// Why the event loop stopped.
#[derive(Debug)]
pub enum LoopExit {
    /// The watch stream ended.
    Closed,
    /// The watcher reported an error; watching is suspended.
    Failed(WatchError),
    /// The loop was cancelled by its owner.
    Cancelled,
}

/// Everything a dispatched file task needs.
#[derive(Debug)]
pub struct Dispatcher<B> {
    pool: WorkerPool,
    processor: Arc<FileProcessor<B>>,
    stats: Arc<PipelineStats>,
}

impl<B: Broker> Dispatcher<B> {
    /// Creates a dispatcher running files on `pool`.
    pub fn new(pool: WorkerPool, processor: FileProcessor<B>, stats: Arc<PipelineStats>) -> Self {
        Self {
            pool,
            processor: Arc::new(processor),
            stats,
        }
    }

    /// Consumes watch signals until the stream ends, fails or `cancel` fires.
    ///
    /// No slot is acquired and no file is dispatched after an error signal.
    /// Files already dispatched keep running.
    pub async fn run(&self, mut events: WatchEvents, cancel: CancellationToken) -> LoopExit {
        loop {
            let signal = tokio::select! {
                biased;
                () = cancel.cancelled() => return LoopExit::Cancelled,
                signal = events.recv() => signal,
            };

            let event = match signal {
                None => {
                    tracing::info!("Watch closed, event loop stopping");
                    return LoopExit::Closed;
                }
                Some(WatchSignal::Error(error)) => {
                    tracing::error!(error = %error, "File watcher error");
                    tracing::warn!("File watching suspended, reader restart recommended");
                    return LoopExit::Failed(error);
                }
                Some(WatchSignal::Event(event)) => event,
            };

            tracing::info!(
                path = %event.path,
                op = %event.op,
                mod_time = %event.mod_time_display(),
                "File event"
            );
            if !event.is_processable() {
                if event.is_dir {
                    tracing::debug!(path = %event.path, "Skipping directory event");
                }
                continue;
            }

            let slot = tokio::select! {
                biased;
                () = cancel.cancelled() => return LoopExit::Cancelled,
                slot = self.pool.acquire() => slot,
            };
            let Some(slot) = slot else {
                tracing::debug!("Worker pool closed, event loop stopping");
                return LoopExit::Cancelled;
            };

            self.stats.file_dispatched();
            tracing::debug!(
                path = %event.path,
                available = self.pool.available(),
                "Dispatching file"
            );
            let processor = Arc::clone(&self.processor);
            self.pool.spawn(slot, async move {
                processor.process(&event.path).await.log();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::publisher::Publisher;
    use camino::Utf8PathBuf;
    use otf_core::{InputFormat, Meta};
    use otf_watcher::{FileEvent, FileOp};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::{Semaphore, mpsc};

    struct Harness {
        dir: TempDir,
        broker: MemoryBroker,
        pool: WorkerPool,
        stats: Arc<PipelineStats>,
        signals: mpsc::Sender<WatchSignal>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<LoopExit>,
    }

    impl Harness {
        fn start(broker: MemoryBroker, capacity: usize) -> Self {
            let pool = WorkerPool::new(capacity);
            let stats = Arc::new(PipelineStats::new());
            let publisher = Publisher::new(
                Arc::new(broker.clone()),
                "t1",
                pool.tracker(),
                Arc::clone(&stats),
            );
            let processor =
                FileProcessor::new(publisher, Meta::default(), InputFormat::Json, Arc::clone(&stats));
            let dispatcher = Dispatcher::new(pool.clone(), processor, Arc::clone(&stats));

            let (signals, rx) = mpsc::channel(16);
            let cancel = CancellationToken::new();
            let loop_cancel = cancel.clone();
            let handle =
                tokio::spawn(async move { dispatcher.run(WatchEvents::new(rx), loop_cancel).await });

            Self {
                dir: TempDir::new().expect("temp dir"),
                broker,
                pool,
                stats,
                signals,
                cancel,
                handle,
            }
        }

        fn file(&self, name: &str, body: &str) -> Utf8PathBuf {
            let path = Utf8PathBuf::try_from(self.dir.path().join(name)).expect("utf-8");
            std::fs::write(&path, body).expect("write");
            path
        }

        async fn send(&self, path: Utf8PathBuf, op: FileOp) {
            self.signals
                .send(WatchSignal::Event(FileEvent::new(path, op)))
                .await
                .expect("loop running");
        }

        async fn wait_until(&self, what: &str, cond: impl Fn(&Self) -> bool) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while !cond(self) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
        }
    }

    #[tokio::test]
    async fn test_create_and_write_dispatch_remove_does_not() {
        let h = Harness::start(MemoryBroker::new(), 4);
        let a = h.file("a.json", "[1]");
        let b = h.file("b.json", "[2,3]");

        h.send(a.clone(), FileOp::Create).await;
        h.send(b, FileOp::Write).await;
        h.send(a, FileOp::Remove).await;
        h.wait_until("three records", |h| h.broker.messages().len() == 3)
            .await;

        h.cancel.cancel();
        assert!(matches!(h.handle.await.expect("join"), LoopExit::Cancelled));
        assert_eq!(h.stats.snapshot().files_dispatched, 2);
    }

    #[tokio::test]
    async fn test_directory_events_are_skipped() {
        let h = Harness::start(MemoryBroker::new(), 1);
        let dir = Utf8PathBuf::try_from(h.dir.path().to_path_buf()).expect("utf-8");
        h.signals
            .send(WatchSignal::Event(FileEvent::new(dir, FileOp::Create).with_dir(true)))
            .await
            .expect("send");
        drop(h.signals);

        assert!(matches!(h.handle.await.expect("join"), LoopExit::Closed));
        assert_eq!(h.stats.snapshot().files_dispatched, 0);
    }

    #[tokio::test]
    async fn test_third_file_waits_for_a_slot() {
        let gate = Arc::new(Semaphore::new(0));
        let h = Harness::start(MemoryBroker::new().with_gate(Arc::clone(&gate)), 2);
        for name in ["a.json", "b.json", "c.json"] {
            let path = h.file(name, "[1]");
            h.send(path, FileOp::Create).await;
        }

        h.wait_until("two blocked publishes", |h| h.broker.waiting() == 2)
            .await;
        assert_eq!(h.stats.snapshot().files_dispatched, 2);
        assert_eq!(h.pool.available(), 0);

        gate.add_permits(1);
        h.wait_until("third dispatch", |h| h.stats.snapshot().files_dispatched == 3)
            .await;

        gate.add_permits(2);
        h.wait_until("all published", |h| h.broker.messages().len() == 3)
            .await;
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn test_watch_error_stops_dispatching() {
        let gate = Arc::new(Semaphore::new(0));
        let h = Harness::start(MemoryBroker::new().with_gate(Arc::clone(&gate)), 4);
        let a = h.file("a.json", "[1]");
        let b = h.file("b.json", "[2]");

        h.send(a, FileOp::Create).await;
        h.signals
            .send(WatchSignal::Error(WatchError::from(poll_error())))
            .await
            .expect("send");
        let _ = h.signals.send(WatchSignal::Event(FileEvent::new(b, FileOp::Create))).await;

        let exit = h.handle.await.expect("join");
        assert!(matches!(exit, LoopExit::Failed(_)));
        assert_eq!(h.stats.snapshot().files_dispatched, 1);

        // The file dispatched before the error still completes.
        gate.add_permits(1);
        assert!(h.pool.drain(Duration::from_secs(5)).await);
        assert_eq!(h.broker.messages().len(), 1);
        assert_eq!(h.stats.snapshot().files_completed, 1);
    }

    fn poll_error() -> std::io::Error {
        std::io::Error::other("poll failed")
    }
}

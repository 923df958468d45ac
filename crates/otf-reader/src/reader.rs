//! The reader lifecycle.
//!
//! ```text
//! ReaderSettings::build ──► Reader ──start()──► RunningReader ──close()──► StatsSnapshot
//!   (Unconfigured)        (Configured)           (Watching)     (Closing → Closed)
//! ```
//!
//! `close` consumes the running reader, so closing twice does not compile.

use std::fmt;
use std::sync::Arc;

use otf_core::ReaderConfig;
use otf_watcher::{FileWatcher, filter_for};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, NatsBroker};
use crate::error::ReaderError;
use crate::event_loop::{Dispatcher, LoopExit};
use crate::pool::WorkerPool;
use crate::processor::FileProcessor;
use crate::publisher::Publisher;
use crate::shutdown::{self, ShutdownListener, ShutdownReason, ShutdownSender};
use crate::stats::{PipelineStats, StatsSnapshot};

/// Lifecycle states, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Built and validated, not yet watching.
    Configured,
    /// Connected and dispatching file events.
    Watching,
    /// Shutting down.
    Closing,
    /// Fully stopped.
    Closed,
}

impl ReaderState {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Watching => "watching",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured reader that has not started watching.
#[derive(Debug)]
pub struct Reader {
    config: ReaderConfig,
}

impl Reader {
    /// Wraps a validated configuration.
    #[must_use]
    pub fn new(config: ReaderConfig) -> Self {
        tracing::debug!(name = config.name(), state = %ReaderState::Configured, "Reader created");
        Self { config }
    }

    /// The reader's configuration.
    #[must_use]
    pub const fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Connects to the configured NATS broker and starts watching.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Connect`] if the broker is unreachable, in
    /// which case watching never starts, or [`ReaderError::Watch`] if the
    /// folder cannot be watched.
    pub async fn start(self) -> Result<RunningReader<NatsBroker>, ReaderError> {
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let broker =
            NatsBroker::connect(self.config.broker(), self.config.name(), shutdown_tx.clone())
                .await?;
        self.launch(broker, shutdown_tx, shutdown_rx).await
    }

    /// Starts watching, publishing through `broker`.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Watch`] if the folder cannot be watched.
    pub async fn start_with_broker<B: Broker>(
        self,
        broker: B,
    ) -> Result<RunningReader<B>, ReaderError> {
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        self.launch(broker, shutdown_tx, shutdown_rx).await
    }

    async fn launch<B: Broker>(
        self,
        broker: B,
        shutdown_tx: ShutdownSender,
        shutdown_rx: ShutdownListener,
    ) -> Result<RunningReader<B>, ReaderError> {
        let config = self.config;
        let broker = Arc::new(broker);

        let watch = config.watch();
        let (watcher, events) = match FileWatcher::new(watch, filter_for(watch)).await {
            Ok(started) => started,
            Err(err) => {
                if let Err(close_err) = broker.close().await {
                    tracing::warn!(error = %close_err, "Broker close failed after watch error");
                }
                return Err(err.into());
            }
        };

        let stats = Arc::new(PipelineStats::new());
        let pool = WorkerPool::new(config.concurrent_files());
        let publisher = Publisher::new(
            Arc::clone(&broker),
            config.broker().topic(),
            pool.tracker(),
            Arc::clone(&stats),
        );
        let processor = FileProcessor::new(
            publisher,
            config.meta(),
            config.input_format(),
            Arc::clone(&stats),
        );
        let dispatcher = Dispatcher::new(pool.clone(), processor, Arc::clone(&stats));

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let loop_shutdown = shutdown_tx.clone();
        let event_loop = tokio::spawn(async move {
            match dispatcher.run(events, loop_cancel).await {
                LoopExit::Closed => loop_shutdown.request(ShutdownReason::WatchClosed),
                // Dispatched files keep running; the process stays up.
                LoopExit::Failed(_) | LoopExit::Cancelled => {}
            }
        });

        tracing::info!(
            name = config.name(),
            folder = %watch.folder(),
            topic = config.broker().topic(),
            workers = pool.capacity(),
            state = %ReaderState::Watching,
            "Reader started"
        );

        Ok(RunningReader {
            config,
            broker,
            watcher,
            pool,
            stats,
            cancel,
            event_loop,
            shutdown_rx,
            _shutdown_tx: shutdown_tx,
        })
    }
}

/// A reader that is watching its folder.
#[derive(Debug)]
pub struct RunningReader<B: Broker> {
    config: ReaderConfig,
    broker: Arc<B>,
    watcher: FileWatcher,
    pool: WorkerPool,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    event_loop: JoinHandle<()>,
    shutdown_rx: ShutdownListener,
    // Keeps the channel open so `shutdown_requested` only ends on a request.
    _shutdown_tx: ShutdownSender,
}

impl<B: Broker> RunningReader<B> {
    /// The reader's configuration.
    #[must_use]
    pub const fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Current pipeline counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns `false` once the event loop has stopped dispatching files,
    /// for example after a watch error.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        !self.event_loop.is_finished()
    }

    /// Worker slots not currently in use.
    #[must_use]
    pub fn available_workers(&self) -> usize {
        self.pool.available()
    }

    /// Waits for an internal shutdown request.
    ///
    /// Resolves with the first reason raised by the connection monitor or
    /// the event loop. A watch error is not a shutdown request: dispatching
    /// stops, files already dispatched run to completion and this keeps
    /// waiting. External signals are the caller's concern.
    pub async fn shutdown_requested(&mut self) -> ShutdownReason {
        match self.shutdown_rx.recv().await {
            Some(reason) => reason,
            None => std::future::pending().await,
        }
    }

    /// Stops the reader and returns the final counters.
    ///
    /// Stops the event loop and the watcher, then drains in-flight file tasks
    /// for up to the configured drain timeout, or abandons them if none is
    /// set, and finally closes the broker.
    ///
    /// # Errors
    ///
    /// Returns the first failure from stopping the watcher or closing the
    /// broker; every step is attempted regardless.
    pub async fn close(self) -> Result<StatsSnapshot, ReaderError> {
        tracing::info!(name = self.config.name(), state = %ReaderState::Closing, "Reader closing");

        self.cancel.cancel();
        if let Err(err) = self.event_loop.await {
            tracing::warn!(error = %err, "Event loop task ended abnormally");
        }

        let mut first_error = self.watcher.shutdown().await.err().map(ReaderError::from);

        match self.config.drain_timeout() {
            Some(timeout) => {
                if !self.pool.drain(timeout).await {
                    tracing::warn!(
                        files = self.stats.snapshot().files_in_flight(),
                        tasks = self.pool.in_flight(),
                        "Drain timed out, abandoning in-flight work"
                    );
                }
            }
            None => {
                self.pool.close();
                let tasks = self.pool.in_flight();
                if tasks > 0 {
                    let files = self.stats.snapshot().files_in_flight();
                    tracing::warn!(files, tasks, "Abandoning in-flight work");
                }
            }
        }

        if let Err(err) = self.broker.close().await {
            tracing::error!(error = %err, "Broker close failed");
            first_error.get_or_insert(err.into());
        }

        let snapshot = self.stats.snapshot();
        tracing::info!(
            name = self.config.name(),
            state = %ReaderState::Closed,
            stats = %snapshot,
            "Reader closed"
        );
        first_error.map_or(Ok(snapshot), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{AckPolicy, MemoryBroker};
    use camino::Utf8Path;
    use otf_core::{Envelope, ReaderSettings};
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    fn settings(dir: &TempDir) -> ReaderSettings {
        let folder = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir");
        ReaderSettings::new()
            .name("r1")
            .id("id1")
            .topic("t1")
            .folder(folder.as_str())
            .interval("50ms")
    }

    async fn wait_for(broker: &MemoryBroker, count: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while broker.messages().len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("messages published in time");
    }

    #[tokio::test]
    async fn test_json_file_end_to_end() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings(&dir)
            .input_format("json")
            .provider("vendor")
            .build()
            .expect("config");
        let broker = MemoryBroker::new();
        let reader = Reader::new(config)
            .start_with_broker(broker.clone())
            .await
            .expect("started");

        std::fs::write(dir.path().join("a.json"), r#"[{"x":1},{"x":2}]"#).expect("write");
        wait_for(&broker, 2).await;

        let messages = broker.messages();
        assert!(messages.iter().all(|m| m.topic == "t1"));
        let first = Envelope::from_slice(&messages[0].payload).expect("envelope");
        let second = Envelope::from_slice(&messages[1].payload).expect("envelope");
        assert_eq!(first.original().get(), r#"{"x":1}"#);
        assert_eq!(second.original().get(), r#"{"x":2}"#);
        assert_eq!(first.meta(), second.meta());
        assert_eq!(first.meta().provider_name, "vendor");
        assert_eq!(first.meta().reader_id, "id1");
        assert_eq!(first.meta().align_method, "");

        let stats = reader.close().await.expect("closed");
        assert!(stats.records_published >= 2);
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_suffix_filter_applies() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings(&dir).suffix("csv").build().expect("config");
        let broker = MemoryBroker::new();
        let reader = Reader::new(config)
            .start_with_broker(broker.clone())
            .await
            .expect("started");

        std::fs::write(dir.path().join("skip.json"), "[1]").expect("write");
        std::fs::write(dir.path().join("rows.csv"), "a\n1\n").expect("write");
        wait_for(&broker, 1).await;

        let envelope = Envelope::from_slice(&broker.messages()[0].payload).expect("envelope");
        assert_eq!(envelope.original().get(), r#"{"a":"1"}"#);
        reader.close().await.expect("closed");
    }

    #[tokio::test]
    async fn test_failed_file_does_not_stop_reader() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings(&dir).input_format("json").build().expect("config");
        let broker = MemoryBroker::new();
        let reader = Reader::new(config)
            .start_with_broker(broker.clone())
            .await
            .expect("started");

        std::fs::write(dir.path().join("bad.json"), r#"{"not":"an array"}"#).expect("write");
        std::fs::write(dir.path().join("good.json"), "[7]").expect("write");
        wait_for(&broker, 1).await;

        let envelope = Envelope::from_slice(&broker.messages()[0].payload).expect("envelope");
        assert_eq!(envelope.original().get(), "7");
        tokio::time::timeout(Duration::from_secs(10), async {
            while reader.stats().files_failed == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("bad file reported as failed");
        reader.close().await.expect("closed");
    }

    async fn wait_until(what: &str, cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[tokio::test]
    async fn test_malformed_csv_leaves_sibling_csv_unaffected() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings(&dir).input_format("csv").build().expect("config");
        let broker = MemoryBroker::new();
        let reader = Reader::new(config)
            .start_with_broker(broker.clone())
            .await
            .expect("started");

        std::fs::write(dir.path().join("ragged.csv"), "a,b\n1,2,3\n").expect("write");
        std::fs::write(dir.path().join("rows.csv"), "a\n1\n2\n").expect("write");
        wait_for(&broker, 2).await;
        wait_until("ragged file failed", || reader.stats().files_failed > 0).await;

        let originals: Vec<String> = broker
            .messages()
            .iter()
            .map(|m| Envelope::from_slice(&m.payload).expect("envelope"))
            .map(|e| e.original().get().to_owned())
            .collect();
        assert_eq!(&originals[..2], [r#"{"a":"1"}"#, r#"{"a":"2"}"#]);
        assert!(originals.iter().all(|o| !o.contains('b')));
        reader.close().await.expect("closed");
    }

    #[tokio::test]
    async fn test_watch_error_lets_dispatched_file_finish() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings(&dir).input_format("json").build().expect("config");
        let gate = Arc::new(Semaphore::new(0));
        let broker = MemoryBroker::new().with_gate(Arc::clone(&gate));
        let mut reader = Reader::new(config)
            .start_with_broker(broker.clone())
            .await
            .expect("started");

        std::fs::write(dir.path().join("a.json"), "[1,2]").expect("write");
        wait_until("blocked publish", || broker.waiting() > 0).await;

        // Removing the watched folder makes the next poll fail.
        std::fs::remove_dir_all(dir.path()).expect("remove folder");
        wait_until("dispatching to stop", || !reader.is_watching()).await;
        let request =
            tokio::time::timeout(Duration::from_millis(200), reader.shutdown_requested()).await;
        assert!(request.is_err(), "watch error must not request shutdown");

        gate.add_permits(16);
        wait_for(&broker, 2).await;
        wait_until("dispatched file completed", || {
            let stats = reader.stats();
            stats.files_completed > 0 && stats.files_completed == stats.files_dispatched
        })
        .await;

        let stats = reader.close().await.expect("closed");
        assert_eq!(stats.files_failed, 0);
        assert!(stats.records_published >= 2);
    }

    #[tokio::test]
    async fn test_close_drains_pending_acks() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings(&dir)
            .input_format("json")
            .drain_timeout("5s")
            .build()
            .expect("config");
        let broker = MemoryBroker::with_policy(AckPolicy::FailDelivery(BTreeSet::from([0])))
            .with_ack_delay(Duration::from_millis(100));
        let reader = Reader::new(config)
            .start_with_broker(broker.clone())
            .await
            .expect("started");

        std::fs::write(dir.path().join("a.json"), "[1]").expect("write");
        wait_for(&broker, 1).await;

        let stats = reader.close().await.expect("closed");
        assert_eq!(stats.delivery_failures, 1);
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_folder() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings(&dir).build().expect("config");
        drop(dir);

        let broker = MemoryBroker::new();
        let err = Reader::new(config)
            .start_with_broker(broker.clone())
            .await
            .expect_err("folder is gone");
        assert!(matches!(err, ReaderError::Watch(_)));
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_close_without_activity() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings(&dir).concurrent_files(3).build().expect("config");
        let reader = Reader::new(config)
            .start_with_broker(MemoryBroker::new())
            .await
            .expect("started");
        assert_eq!(reader.available_workers(), 3);

        let stats = reader.close().await.expect("closed");
        assert_eq!(stats, StatsSnapshot::default());
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(ReaderState::Watching.to_string(), "watching");
        assert_eq!(ReaderState::Closed.as_str(), "closed");
    }
}

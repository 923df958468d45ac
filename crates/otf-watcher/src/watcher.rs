//! Polling folder watcher with async signal streaming.
//!
//! This module provides the [`FileWatcher`] type that bridges the synchronous
//! `notify` poll watcher to the async tokio runtime.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Blocking Thread (spawn_blocking)             │
//! │  ┌──────────────┐    ┌──────────────────┐    ┌────────────┐  │
//! │  │ PollWatcher  │ -> │ FileOp mapping   │ -> │ FileFilter │  │
//! │  │ (interval)   │    │ + metadata       │    │            │  │
//! │  └──────────────┘    └──────────────────┘    └─────┬──────┘  │
//! └────────────────────────────────────────────────────│─────────┘
//!                                        blocking_send │
//!                                                      ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Async Runtime (tokio)                        │
//! │  FileWatcher (shutdown ctrl)     WatchEvents -> event loop   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The watcher thread owns the only sender. Once it stops, either via
//! [`FileWatcher::shutdown`] or because the consumer went away, the
//! [`WatchEvents`] stream ends.

use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use notify::{Config, Event, PollWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use otf_core::WatchConfig;

use crate::error::WatchError;
use crate::events::{FileEvent, FileOp, WatchEvents, WatchSignal};
use crate::filter::FileFilter;

/// Default channel capacity for watch signals.
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// A running folder watch.
///
/// Created together with its [`WatchEvents`] stream by [`FileWatcher::new`].
/// Dropping the watcher stops the poll thread; call
/// [`shutdown`](Self::shutdown) to also wait for it.
pub struct FileWatcher {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
    watch_path: Utf8PathBuf,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("watch_path", &self.watch_path)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Starts polling the configured folder.
    ///
    /// Returns once the poll watcher is registered, so a failure to start
    /// watching is reported here rather than on the stream.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathNotFound`] if the folder doesn't exist,
    /// [`WatchError::Notify`] if the poll watcher fails to start, and
    /// [`WatchError::ChannelClosed`] if the watcher thread dies during start-up.
    pub async fn new<F: FileFilter>(
        config: &WatchConfig,
        filter: F,
    ) -> Result<(Self, WatchEvents), WatchError> {
        Self::with_capacity(config, filter, DEFAULT_CHANNEL_CAPACITY).await
    }

    /// Starts polling with a custom signal channel capacity.
    ///
    /// # Errors
    ///
    /// Same as [`FileWatcher::new`].
    pub async fn with_capacity<F: FileFilter>(
        config: &WatchConfig,
        filter: F,
        channel_capacity: usize,
    ) -> Result<(Self, WatchEvents), WatchError> {
        let path = config.folder();
        if !path.exists() {
            return Err(WatchError::path_not_found(path));
        }
        let watch_path = path.canonicalize_utf8()?;

        let (signal_tx, signal_rx) = mpsc::channel(channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let options = LoopOptions {
            path: watch_path.clone(),
            poll_config: Config::default().with_poll_interval(config.interval()),
            mode: if config.recursive() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            },
        };
        let task_handle = tokio::task::spawn_blocking(move || {
            run_watcher_loop(options, signal_tx, ready_tx, shutdown_rx, filter);
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(WatchError::ChannelClosed),
        }

        Ok((
            Self {
                shutdown_tx: Some(shutdown_tx),
                task_handle: Some(task_handle),
                watch_path,
            },
            WatchEvents::new(signal_rx),
        ))
    }

    /// Returns the canonical path being watched.
    #[must_use]
    pub fn watch_path(&self) -> &Utf8Path {
        &self.watch_path
    }

    /// Returns `true` if the watcher thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some() && self.task_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops polling and waits for the watcher thread to exit.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ChannelClosed`] if the watcher thread panicked.
    pub async fn shutdown(mut self) -> Result<(), WatchError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            handle.await.map_err(|_| WatchError::ChannelClosed)?;
        }
        Ok(())
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

struct LoopOptions {
    path: Utf8PathBuf,
    poll_config: Config,
    mode: RecursiveMode,
}

/// Runs the poll watcher until shutdown, forwarding filtered signals.
fn run_watcher_loop<F: FileFilter>(
    options: LoopOptions,
    signal_tx: mpsc::Sender<WatchSignal>,
    ready_tx: oneshot::Sender<Result<(), WatchError>>,
    shutdown_rx: oneshot::Receiver<()>,
    filter: F,
) {
    let LoopOptions {
        path,
        poll_config,
        mode,
    } = options;

    let handler_tx = signal_tx.clone();
    let handler = move |res: notify::Result<Event>| match res {
        Ok(event) => forward_event(event, &filter, &handler_tx),
        Err(error) => {
            tracing::error!(error = %error, "Watch primitive reported an error");
            let _ = handler_tx.blocking_send(WatchSignal::Error(error.into()));
        }
    };

    let mut watcher = match PollWatcher::new(handler, poll_config) {
        Ok(watcher) => watcher,
        Err(error) => {
            let _ = ready_tx.send(Err(error.into()));
            return;
        }
    };
    if let Err(error) = watcher.watch(path.as_std_path(), mode) {
        let _ = ready_tx.send(Err(error.into()));
        return;
    }

    tracing::info!(
        path = %path,
        recursive = matches!(mode, RecursiveMode::Recursive),
        "File watcher started"
    );
    let _ = ready_tx.send(Ok(()));

    let _ = shutdown_rx.blocking_recv();

    drop(watcher);
    drop(signal_tx);
    tracing::info!(path = %path, "File watcher stopped");
}

fn forward_event<F: FileFilter>(event: Event, filter: &F, tx: &mpsc::Sender<WatchSignal>) {
    let Some(op) = FileOp::from_kind(&event.kind) else {
        tracing::trace!(kind = ?event.kind, "Ignoring unclassified watch event");
        return;
    };

    for path in event.paths {
        let path = match Utf8PathBuf::try_from(path) {
            Ok(p) => p,
            Err(e) => {
                let invalid_path = e.into_path_buf();
                tracing::warn!(
                    path = %invalid_path.display(),
                    "Skipping non-UTF-8 path in file event"
                );
                continue;
            }
        };

        if !filter.should_process(&path) {
            tracing::trace!(path = %path, "Filtered out file event");
            continue;
        }

        let file_event = if op == FileOp::Remove {
            FileEvent::new(path, op)
        } else {
            FileEvent::from_disk(path, op)
        };
        if tx.blocking_send(WatchSignal::Event(file_event)).is_err() {
            tracing::debug!("Signal channel closed, dropping file event");
            return;
        }
    }
}

/// Lists the files currently under watch.
///
/// Honors the same recursion, dot-file and filter settings as the watcher.
/// Entries that cannot be read or are not valid UTF-8 are skipped with a
/// warning.
///
/// # Errors
///
/// Returns [`WatchError::PathNotFound`] if the folder doesn't exist.
pub fn watched_files<F: FileFilter + ?Sized>(
    config: &WatchConfig,
    filter: &F,
) -> Result<Vec<Utf8PathBuf>, WatchError> {
    let root = config.folder();
    if !root.exists() {
        return Err(WatchError::path_not_found(root));
    }

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(!config.dotfiles())
        .follow_links(false)
        .max_depth((!config.recursive()).then_some(1))
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(error = %WatchError::from(error), "Skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_none_or(|ft| !ft.is_file()) {
            continue;
        }
        let path = match Utf8PathBuf::try_from(entry.into_path()) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %WatchError::NonUtf8Path(e.into_path_buf()), "Skipping entry");
                continue;
            }
        };
        if filter.should_process(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

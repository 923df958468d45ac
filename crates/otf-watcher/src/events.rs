//! Signals streamed from the watcher thread into async code.
//!
//! # Signal Flow
//!
//! ```text
//! notify::PollWatcher (blocking thread)
//!        │  Ok(event)          Err(error)
//!        ▼                     ▼
//!  WatchSignal::Event    WatchSignal::Error
//!        │
//!        ▼  bounded mpsc (blocking_send)
//!   WatchEvents::recv()  ── None once the watcher is gone (watch closed)
//! ```

use std::fmt;
use std::time::{Instant, SystemTime};

use camino::Utf8PathBuf;
use notify::EventKind;
use tokio::sync::mpsc;

use crate::error::WatchError;

/// The kind of change a [`FileEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOp {
    /// A new file or directory appeared.
    Create,
    /// An existing file's content or metadata changed.
    Write,
    /// A file or directory disappeared.
    Remove,
}

impl FileOp {
    /// Maps a notify event kind onto a file operation.
    ///
    /// Access and unclassified events have no counterpart and return `None`.
    #[must_use]
    pub const fn from_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Create),
            EventKind::Modify(_) => Some(Self::Write),
            EventKind::Remove(_) => Some(Self::Remove),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        }
    }

    /// Returns the uppercase label used in logs.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Write => "WRITE",
            Self::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected filesystem change.
///
/// Produced by the watcher and consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Absolute path of the changed entry.
    pub path: Utf8PathBuf,
    /// What happened to it.
    pub op: FileOp,
    /// Whether the entry is a directory. Always `false` for removals.
    pub is_dir: bool,
    /// Last modification time, when the entry still exists.
    pub mod_time: Option<SystemTime>,
    /// When the event was received.
    pub timestamp: Instant,
}

impl FileEvent {
    /// Creates an event for a regular file with no recorded modification time.
    #[must_use]
    pub fn new(path: Utf8PathBuf, op: FileOp) -> Self {
        Self {
            path,
            op,
            is_dir: false,
            mod_time: None,
            timestamp: Instant::now(),
        }
    }

    /// Creates an event, reading the entry's metadata from disk.
    ///
    /// Entries that no longer exist are reported as non-directories with no
    /// modification time.
    #[must_use]
    pub fn from_disk(path: Utf8PathBuf, op: FileOp) -> Self {
        let metadata = std::fs::metadata(&path).ok();
        Self {
            is_dir: metadata.as_ref().is_some_and(std::fs::Metadata::is_dir),
            mod_time: metadata.and_then(|m| m.modified().ok()),
            ..Self::new(path, op)
        }
    }

    /// Marks the event as describing a directory.
    #[must_use]
    pub const fn with_dir(mut self, is_dir: bool) -> Self {
        self.is_dir = is_dir;
        self
    }

    /// Returns `true` for create and write events on regular files.
    #[inline]
    #[must_use]
    pub const fn is_processable(&self) -> bool {
        !self.is_dir && matches!(self.op, FileOp::Create | FileOp::Write)
    }

    /// Modification time formatted for logs, or `unknown`.
    #[must_use]
    pub fn mod_time_display(&self) -> String {
        self.mod_time.map_or_else(
            || "unknown".to_owned(),
            |t| humantime::format_rfc3339_seconds(t).to_string(),
        )
    }
}

/// One message from the watcher thread.
#[derive(Debug)]
pub enum WatchSignal {
    /// A filtered change notification.
    Event(FileEvent),
    /// The watch primitive failed; no further events should be trusted.
    Error(WatchError),
}

/// Receiving half of a watch.
///
/// [`recv`](Self::recv) returns `None` once the watcher has stopped, which is
/// the watch-closed signal.
#[derive(Debug)]
pub struct WatchEvents {
    rx: mpsc::Receiver<WatchSignal>,
}

impl WatchEvents {
    /// Wraps the receiving end of a signal channel.
    #[must_use]
    pub const fn new(rx: mpsc::Receiver<WatchSignal>) -> Self {
        Self { rx }
    }

    /// Receives the next signal.
    pub async fn recv(&mut self) -> Option<WatchSignal> {
        self.rx.recv().await
    }
}

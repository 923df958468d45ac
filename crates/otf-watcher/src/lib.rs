//! Polling folder watcher with async signal streaming.
//!
//! This crate is the filesystem collaborator of the reader. It polls a folder
//! with `notify`'s [`PollWatcher`](notify::PollWatcher) on a blocking thread
//! and streams [`WatchSignal`]s into tokio:
//!
//! - [`WatchSignal::Event`] - a create, write or remove of a path that passed
//!   the filter
//! - [`WatchSignal::Error`] - the watch primitive failed
//! - end of stream - the watcher stopped (watch closed)
//!
//! # Crate Dependencies
//!
//! ```text
//! otf-cli ──► otf-reader ──► otf-watcher ──► otf-core
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use otf_core::ReaderSettings;
//! use otf_watcher::{FileWatcher, WatchSignal, filter_for};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReaderSettings::new().topic("otf.raw").suffix("csv").build()?;
//! let watch = config.watch();
//!
//! let (watcher, mut events) = FileWatcher::new(watch, filter_for(watch)).await?;
//! while let Some(signal) = events.recv().await {
//!     match signal {
//!         WatchSignal::Event(event) => println!("{} {}", event.op, event.path),
//!         WatchSignal::Error(error) => {
//!             eprintln!("watch failed: {error}");
//!             break;
//!         }
//!     }
//! }
//! watcher.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod filter;
pub mod watcher;

pub use error::WatchError;
pub use events::{FileEvent, FileOp, WatchEvents, WatchSignal};
pub use filter::{
    AcceptAllFilter, CompositeFilter, FileFilter, HiddenFileFilter, IgnoreFilter, SuffixFilter,
    filter_for,
};
pub use watcher::{FileWatcher, watched_files};

//! Folder-to-broker ingestion pipeline.
//!
//! A [`Reader`] watches a folder; every file created or rewritten there is
//! parsed into records, each record is wrapped in an
//! [`Envelope`](otf_core::Envelope) and published to the configured topic.
//!
//! # Pipeline
//!
//! ```text
//! FileWatcher ──► Dispatcher ──► WorkerPool (≤ C tasks)
//!                                   │
//!                                   ▼
//!                  RecordStream ──► Envelope ──► Publisher ──► Broker
//!                                                   │
//!                                                   └─► ack waiter (warn on failure)
//! ```
//!
//! Per-file failures are logged and contained. A lost broker connection or
//! a failed watch is reported through [`RunningReader::shutdown_requested`].
//!
//! # Usage
//!
//! ```no_run
//! use otf_core::ReaderSettings;
//! use otf_reader::Reader;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReaderSettings::new()
//!     .topic("otf.raw")
//!     .folder("./in")
//!     .input_format("json")
//!     .build()?;
//!
//! let mut reader = Reader::new(config).start().await?;
//! tokio::select! {
//!     reason = reader.shutdown_requested() => eprintln!("stopping: {reason}"),
//!     _ = tokio::signal::ctrl_c() => {}
//! }
//! let stats = reader.close().await?;
//! println!("{stats}");
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod broker;
pub mod error;
pub mod event_loop;
pub mod pool;
pub mod processor;
pub mod publisher;
pub mod reader;
pub mod shutdown;
pub mod stats;
pub mod transform;

pub use broker::{AckPolicy, Broker, MemoryBroker, NatsBroker, PendingAck, PublishedMessage};
pub use error::{
    ConnectError, DeliveryError, ProcessError, PublishError, ReaderError, TransformError,
};
pub use event_loop::{Dispatcher, LoopExit};
pub use pool::{WorkerPool, WorkerSlot};
pub use processor::{FileProcessor, FileReport};
pub use publisher::Publisher;
pub use reader::{Reader, ReaderState, RunningReader};
pub use shutdown::{ShutdownListener, ShutdownReason, ShutdownSender};
pub use stats::{PipelineStats, StatsSnapshot};
pub use transform::{RawRecord, RecordStream, csv_to_json_array};

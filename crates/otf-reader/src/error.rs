//! Error types for the otf-reader crate.
//!
//! Errors are split by blast radius:
//!
//! - [`ReaderError`] - lifecycle failures; the reader never reaches or
//!   leaves the watching state cleanly
//! - [`ProcessError`] - one file's task aborted; other files are unaffected
//! - [`DeliveryError`] - one record's broker ack failed; logged only

use camino::Utf8PathBuf;
use otf_core::EnvelopeError;
use otf_watcher::WatchError;

/// Errors raised while turning a file into raw records.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The input file could not be opened.
    #[error("cannot open {path}: {source}")]
    Open {
        /// The file that failed to open.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading the input failed part way through.
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),

    /// The tabular data could not be converted to a JSON array.
    #[error("cannot convert CSV to JSON: {0}")]
    Csv(#[from] csv::Error),

    /// The input is not a JSON array.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// An array element could not be decoded.
    #[error("cannot decode record: {0}")]
    Decode(#[from] serde_json::Error),

    /// The parser thread stopped without reporting a result.
    #[error("record parser stopped unexpectedly")]
    ParserStopped,
}

/// Synchronous publish failures, returned before a message is enqueued.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    /// The broker refused to enqueue the message.
    #[error("cannot publish to '{topic}': {reason}")]
    Rejected {
        /// The target topic.
        topic: String,
        /// The broker's reason.
        reason: String,
    },

    /// The broker connection has been closed.
    #[error("broker connection is closed")]
    Closed,

    /// Flushing pending messages at close failed.
    #[error("cannot flush broker connection: {0}")]
    Flush(String),
}

/// Asynchronous delivery failure for one message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delivery of message {message_id} failed: {reason}")]
pub struct DeliveryError {
    /// The id returned by the publish call.
    pub message_id: String,
    /// The broker's reason.
    pub reason: String,
}

/// The initial broker connection could not be established.
#[derive(Debug, thiserror::Error)]
#[error("cannot connect to broker at {url}: {source}")]
pub struct ConnectError {
    /// The broker URL.
    pub url: String,
    /// The client error.
    #[source]
    pub source: async_nats::ConnectError,
}

/// Reasons a single file's processing task aborted.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Transforming the file into records failed.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// A record could not be wrapped in an envelope.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// A record could not be handed to the broker.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Errors from the reader lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// The broker connection could not be opened.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Watching could not start or stop.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// The broker failed while closing.
    #[error(transparent)]
    Broker(#[from] PublishError),
}

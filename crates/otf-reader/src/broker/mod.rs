//! Message broker abstraction.
//!
//! A [`Broker`] enqueues a payload and hands back a [`PendingAck`] at once;
//! delivery is confirmed, or not, when the ack resolves. Two implementations
//! are provided:
//!
//! - [`NatsBroker`] - NATS JetStream, with heartbeat-based loss detection
//! - [`MemoryBroker`] - in-process recorder for tests and dry runs

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::error::{DeliveryError, PublishError};

pub mod memory;
pub mod nats;

pub use memory::{AckPolicy, MemoryBroker, PublishedMessage};
pub use nats::NatsBroker;

/// A connection able to publish payloads to topics.
///
/// Implementations are shared by every file task, so all methods take
/// `&self`.
pub trait Broker: Send + Sync + 'static {
    /// Enqueues `payload` on `topic`.
    ///
    /// Resolves as soon as the message is accepted for sending. Errors here
    /// are synchronous failures: the message was never enqueued.
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<PendingAck, PublishError>> + Send;

    /// Flushes pending messages and closes the connection.
    ///
    /// Called once, by the reader, after all file tasks are drained or
    /// abandoned.
    fn close(&self) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// The outstanding acknowledgment of one enqueued message.
pub struct PendingAck {
    message_id: String,
    ack: BoxFuture<'static, Result<(), DeliveryError>>,
}

impl PendingAck {
    /// Wraps a future that resolves when the broker confirms delivery.
    pub fn new<F>(message_id: impl Into<String>, ack: F) -> Self
    where
        F: Future<Output = Result<(), DeliveryError>> + Send + 'static,
    {
        Self {
            message_id: message_id.into(),
            ack: ack.boxed(),
        }
    }

    /// An ack that has already succeeded.
    pub fn confirmed(message_id: impl Into<String>) -> Self {
        Self::new(message_id, async { Ok(()) })
    }

    /// The broker-assigned message id.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Waits for the delivery outcome.
    pub async fn wait(self) -> Result<(), DeliveryError> {
        self.ack.await
    }
}

impl fmt::Debug for PendingAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAck")
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}

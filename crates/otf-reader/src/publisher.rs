//! Single-attempt envelope publishing with background ack handling.

use std::sync::Arc;

use bytes::Bytes;
use otf_core::Envelope;
use tokio_util::task::TaskTracker;

use crate::broker::Broker;
use crate::error::ProcessError;
use crate::stats::PipelineStats;

/// Sends envelopes to one topic.
///
/// Each publish returns once the broker has enqueued the message. The ack is
/// awaited by a tracked background task that logs a warning if delivery
/// fails. There are no retries at either step.
#[derive(Debug)]
pub struct Publisher<B> {
    broker: Arc<B>,
    topic: Arc<str>,
    tracker: TaskTracker,
    stats: Arc<PipelineStats>,
}

impl<B> Clone for Publisher<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            topic: Arc::clone(&self.topic),
            tracker: self.tracker.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<B: Broker> Publisher<B> {
    /// Creates a publisher. Ack waiters are spawned on `tracker`.
    pub fn new(
        broker: Arc<B>,
        topic: impl Into<Arc<str>>,
        tracker: TaskTracker,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            broker,
            topic: topic.into(),
            tracker,
            stats,
        }
    }

    /// The target topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serializes and enqueues one envelope, returning its message id.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Envelope`] if the envelope cannot be encoded
    /// and [`ProcessError::Publish`] if the broker refuses the message.
    pub async fn publish(&self, envelope: &Envelope) -> Result<String, ProcessError> {
        let payload = Bytes::from(envelope.to_bytes()?);
        let pending = self.broker.publish(&self.topic, payload).await?;
        self.stats.record_published();

        let message_id = pending.message_id().to_owned();
        let stats = Arc::clone(&self.stats);
        self.tracker.spawn(async move {
            if let Err(err) = pending.wait().await {
                stats.delivery_failed();
                tracing::warn!(
                    message_id = %err.message_id,
                    error = %err.reason,
                    "Broker reported a delivery error"
                );
            }
        });
        Ok(message_id)
    }
}

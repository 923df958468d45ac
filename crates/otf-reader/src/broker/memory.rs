//! In-process broker that records what it is given.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::{Broker, PendingAck};
use crate::error::{DeliveryError, PublishError};

/// How a [`MemoryBroker`] answers publishes.
///
/// Message positions are zero-based, counted across all topics in publish
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AckPolicy {
    /// Enqueue and confirm everything.
    #[default]
    Accept,
    /// Enqueue everything, but fail the ack of the listed positions.
    FailDelivery(BTreeSet<usize>),
    /// Refuse to enqueue from the given position on.
    RejectFrom(usize),
}

/// One message accepted by a [`MemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Position in publish order.
    pub position: usize,
    /// Id returned to the publisher.
    pub message_id: String,
    /// Target topic.
    pub topic: String,
    /// Payload bytes.
    pub payload: Bytes,
}

#[derive(Debug, Default)]
struct Inner {
    policy: AckPolicy,
    retain: bool,
    ack_delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    next_position: AtomicUsize,
    waiting: AtomicUsize,
    closed: AtomicBool,
    messages: Mutex<Vec<PublishedMessage>>,
}

/// A [`Broker`] that keeps every message in memory.
///
/// Clones share state, so a test can keep a handle while the reader owns
/// another.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// A broker that records and confirms every message.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(AckPolicy::Accept)
    }

    /// A recording broker with the given ack policy.
    #[must_use]
    pub fn with_policy(policy: AckPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                retain: true,
                ..Inner::default()
            }),
        }
    }

    /// A broker that logs each payload and keeps nothing, for dry runs.
    #[must_use]
    pub fn discarding() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
        }
    }

    /// Delays every ack by `delay`.
    #[must_use]
    pub fn with_ack_delay(self, delay: Duration) -> Self {
        self.rebuild(|inner| inner.ack_delay = Some(delay))
    }

    /// Makes every publish take one permit from `gate` before it is enqueued.
    #[must_use]
    pub fn with_gate(self, gate: Arc<Semaphore>) -> Self {
        self.rebuild(|inner| inner.gate = Some(gate))
    }

    fn rebuild(self, change: impl FnOnce(&mut Inner)) -> Self {
        let mut inner = Inner {
            policy: self.inner.policy.clone(),
            retain: self.inner.retain,
            ack_delay: self.inner.ack_delay,
            gate: self.inner.gate.clone(),
            ..Inner::default()
        };
        change(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Every message recorded so far, in publish order.
    #[must_use]
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.inner.messages.lock().clone()
    }

    /// Payloads recorded so far, as UTF-8 text.
    #[must_use]
    pub fn payloads(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .map(|m| String::from_utf8_lossy(&m.payload).into_owned())
            .collect()
    }

    /// Publishes currently blocked on the gate.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    /// Returns `true` once [`Broker::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<PendingAck, PublishError> {
        let inner = &self.inner;
        if let Some(gate) = &inner.gate {
            inner.waiting.fetch_add(1, Ordering::SeqCst);
            let permit = gate.acquire().await;
            inner.waiting.fetch_sub(1, Ordering::SeqCst);
            match permit {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(PublishError::Closed),
            }
        }
        if inner.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }

        let position = inner.next_position.fetch_add(1, Ordering::SeqCst);
        if matches!(inner.policy, AckPolicy::RejectFrom(from) if position >= from) {
            return Err(PublishError::Rejected {
                topic: topic.to_owned(),
                reason: "send queue full".to_owned(),
            });
        }

        let message_id = format!("mem-{position}");
        if inner.retain {
            inner.messages.lock().push(PublishedMessage {
                position,
                message_id: message_id.clone(),
                topic: topic.to_owned(),
                payload,
            });
        } else {
            tracing::info!(
                topic,
                message_id,
                payload = %String::from_utf8_lossy(&payload),
                "Dry run: message not sent"
            );
        }

        let fail = matches!(&inner.policy, AckPolicy::FailDelivery(positions) if positions.contains(&position));
        let delay = inner.ack_delay;
        let id = message_id.clone();
        Ok(PendingAck::new(message_id, async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if fail {
                Err(DeliveryError {
                    message_id: id,
                    reason: "simulated delivery failure".to_owned(),
                })
            } else {
                Ok(())
            }
        }))
    }

    async fn close(&self) -> Result<(), PublishError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(gate) = &self.inner.gate {
            gate.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_in_order() {
        let broker = MemoryBroker::new();
        for body in ["a", "b", "c"] {
            let ack = broker
                .publish("t1", Bytes::from_static(body.as_bytes()))
                .await
                .expect("enqueued");
            ack.wait().await.expect("confirmed");
        }

        let messages = broker.messages();
        assert_eq!(broker.payloads(), vec!["a", "b", "c"]);
        assert_eq!(messages[1].position, 1);
        assert_eq!(messages[1].message_id, "mem-1");
        assert!(messages.iter().all(|m| m.topic == "t1"));
    }

    #[tokio::test]
    async fn test_fail_delivery_policy() {
        let broker = MemoryBroker::with_policy(AckPolicy::FailDelivery(BTreeSet::from([1])));
        let first = broker.publish("t", Bytes::new()).await.expect("enqueued");
        let second = broker.publish("t", Bytes::new()).await.expect("enqueued");

        assert!(first.wait().await.is_ok());
        let err = second.wait().await.expect_err("delivery fails");
        assert_eq!(err.message_id, "mem-1");
        assert_eq!(broker.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_reject_from_policy() {
        let broker = MemoryBroker::with_policy(AckPolicy::RejectFrom(1));
        broker.publish("t", Bytes::new()).await.expect("enqueued");
        let err = broker.publish("t", Bytes::new()).await.expect_err("rejected");
        assert!(matches!(err, PublishError::Rejected { .. }));
        assert_eq!(broker.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_broker_rejects() {
        let broker = MemoryBroker::new();
        broker.close().await.expect("close");
        assert!(broker.is_closed());
        let err = broker.publish("t", Bytes::new()).await.expect_err("closed");
        assert!(matches!(err, PublishError::Closed));
    }

    #[tokio::test]
    async fn test_gate_holds_publishes() {
        let gate = Arc::new(Semaphore::new(0));
        let broker = MemoryBroker::new().with_gate(Arc::clone(&gate));
        let handle = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.publish("t", Bytes::new()).await.map(|_| ()) })
        };

        while broker.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(broker.messages().is_empty());

        gate.add_permits(1);
        handle.await.expect("join").expect("enqueued");
        assert_eq!(broker.messages().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_share_one_record() {
        let broker = MemoryBroker::new();
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let broker = broker.clone();
            tasks.spawn(async move {
                for _ in 0..25 {
                    broker.publish("t", Bytes::new()).await.expect("enqueued");
                }
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.expect("join");
        }

        let mut positions: Vec<usize> = broker.messages().iter().map(|m| m.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, (0..200).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_discarding_keeps_nothing() {
        let broker = MemoryBroker::discarding();
        let ack = broker.publish("t", Bytes::from_static(b"{}")).await.expect("enqueued");
        assert_eq!(ack.message_id(), "mem-0");
        assert!(broker.messages().is_empty());
    }
}

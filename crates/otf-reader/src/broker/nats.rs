//! NATS JetStream broker and connection monitoring.
//!
//! The connection is opened once, at reader start. A background monitor
//! probes the connection state every [`HEARTBEAT_INTERVAL`]; after
//! [`MAX_MISSED_HEARTBEATS`] consecutive misses it raises
//! [`ShutdownReason::ConnectionLost`]. The reader does not try to outlive a
//! lost broker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::connection::State;
use async_nats::jetstream;
use async_nats::{Client, ConnectOptions, HeaderMap};
use bytes::Bytes;
use otf_core::BrokerConfig;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{Broker, PendingAck};
use crate::error::{ConnectError, DeliveryError, PublishError};
use crate::shutdown::{ShutdownReason, ShutdownSender};

/// Interval between connection probes, also used as the client ping interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive failed probes before the connection is declared lost.
pub const MAX_MISSED_HEARTBEATS: u32 = 5;

/// Header JetStream uses to de-duplicate messages.
const MESSAGE_ID_HEADER: &str = "Nats-Msg-Id";

/// A JetStream publishing connection.
pub struct NatsBroker {
    client: Client,
    jetstream: jetstream::Context,
    monitor: JoinHandle<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for NatsBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBroker")
            .field("state", &self.client.connection_state())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl NatsBroker {
    /// Connects to the broker described by `config`.
    ///
    /// The client announces itself as `{cluster_id}/{client_id}`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the initial connection fails.
    pub async fn connect(
        config: &BrokerConfig,
        client_id: &str,
        shutdown: ShutdownSender,
    ) -> Result<Self, ConnectError> {
        let url = config.url();
        let client = ConnectOptions::new()
            .name(format!("{}/{client_id}", config.cluster_id()))
            .ping_interval(HEARTBEAT_INTERVAL)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Connected => {
                        tracing::info!("Broker connection established");
                    }
                    async_nats::Event::Disconnected => {
                        tracing::warn!("Broker connection interrupted, reconnecting");
                    }
                    other => tracing::debug!(event = %other, "Broker client event"),
                }
            })
            .connect(url.as_str())
            .await
            .map_err(|source| ConnectError {
                url: url.clone(),
                source,
            })?;

        tracing::info!(
            url = %url,
            cluster = config.cluster_id(),
            client = client_id,
            "Connected to broker"
        );

        let probe_client = client.clone();
        let monitor = tokio::spawn(monitor_connection(
            move || matches!(probe_client.connection_state(), State::Connected),
            HEARTBEAT_INTERVAL,
            MAX_MISSED_HEARTBEATS,
            shutdown,
        ));

        Ok(Self {
            jetstream: jetstream::new(client.clone()),
            client,
            monitor,
            closed: AtomicBool::new(false),
        })
    }
}

impl Broker for NatsBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<PendingAck, PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }

        let message_id = otf_core::generate_id();
        let mut headers = HeaderMap::new();
        headers.insert(MESSAGE_ID_HEADER, message_id.as_str());

        let ack = self
            .jetstream
            .publish_with_headers(topic.to_owned(), headers, payload)
            .await
            .map_err(|e| PublishError::Rejected {
                topic: topic.to_owned(),
                reason: e.to_string(),
            })?;

        let id = message_id.clone();
        Ok(PendingAck::new(message_id, async move {
            ack.await.map(|_| ()).map_err(|e| DeliveryError {
                message_id: id,
                reason: e.to_string(),
            })
        }))
    }

    async fn close(&self) -> Result<(), PublishError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.monitor.abort();
        self.client
            .flush()
            .await
            .map_err(|e| PublishError::Flush(e.to_string()))?;
        tracing::info!("Broker connection closed");
        Ok(())
    }
}

impl Drop for NatsBroker {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}

/// Probes the connection until it misses `max_missed` checks in a row.
///
/// A successful probe resets the count. On loss a single shutdown request is
/// sent and the monitor exits.
pub(crate) async fn monitor_connection<P>(
    probe: P,
    interval: Duration,
    max_missed: u32,
    shutdown: ShutdownSender,
) where
    P: Fn() -> bool + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut missed = 0;
    loop {
        ticker.tick().await;
        if probe() {
            if missed > 0 {
                tracing::info!(missed, "Broker heartbeat recovered");
            }
            missed = 0;
            continue;
        }

        missed += 1;
        tracing::warn!(missed, max_missed, "Broker heartbeat missed");
        if missed >= max_missed {
            tracing::error!(missed, "Broker connection lost");
            shutdown.request(ShutdownReason::ConnectionLost(format!(
                "no heartbeat for {missed} consecutive probes"
            )));
            return;
        }
    }
}

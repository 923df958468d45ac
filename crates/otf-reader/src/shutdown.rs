//! Internal shutdown requests.
//!
//! Components that detect a condition the reader cannot recover from (a lost
//! broker connection or a closed watch stream) send a [`ShutdownReason`] on
//! this channel instead of signalling the process. The owner of the
//! [`ShutdownListener`] decides what to do with it.

use std::fmt;

use tokio::sync::mpsc;

/// Why a component asked the reader to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The broker stopped answering heartbeats.
    ConnectionLost(String),
    /// The watch stream ended without being asked to.
    WatchClosed,
}

impl ShutdownReason {
    /// Returns `true` when the reason is an error condition.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(detail) => write!(f, "broker connection lost: {detail}"),
            Self::WatchClosed => f.write_str("file watching stopped"),
        }
    }
}

/// Sending half, cloned into every component that may request a shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownSender {
    tx: mpsc::UnboundedSender<ShutdownReason>,
}

impl ShutdownSender {
    /// Requests a shutdown. Never blocks.
    pub fn request(&self, reason: ShutdownReason) {
        tracing::debug!(%reason, "Shutdown requested");
        if self.tx.send(reason).is_err() {
            tracing::debug!("Shutdown listener already gone");
        }
    }
}

/// Receiving half, owned by the reader.
#[derive(Debug)]
pub struct ShutdownListener {
    rx: mpsc::UnboundedReceiver<ShutdownReason>,
}

impl ShutdownListener {
    /// Waits for the next request, or `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<ShutdownReason> {
        self.rx.recv().await
    }

    /// Returns a pending request without waiting.
    pub fn try_recv(&mut self) -> Option<ShutdownReason> {
        self.rx.try_recv().ok()
    }
}

/// Creates a connected sender and listener.
#[must_use]
pub fn channel() -> (ShutdownSender, ShutdownListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ShutdownSender { tx }, ShutdownListener { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_wins() {
        let (tx, mut rx) = channel();
        let other = tx.clone();
        other.request(ShutdownReason::ConnectionLost("no heartbeat".to_owned()));
        tx.request(ShutdownReason::WatchClosed);

        let first = rx.recv().await.expect("request");
        assert!(first.is_failure());
        assert_eq!(first.to_string(), "broker connection lost: no heartbeat");
        let second = rx.try_recv().expect("second request");
        assert!(!second.is_failure());
        assert_eq!(second, ShutdownReason::WatchClosed);
        assert_eq!(rx.try_recv(), None);
    }

    #[tokio::test]
    async fn test_recv_ends_when_senders_dropped() {
        let (tx, mut rx) = channel();
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_request_without_listener_is_harmless() {
        let (tx, rx) = channel();
        drop(rx);
        tx.request(ShutdownReason::WatchClosed);
    }
}

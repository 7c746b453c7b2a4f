//! The send/limbo/reconnect engine.
//!
//! # Purpose
//! Wires the three long-lived tasks of a client together: the sender (frames
//! and writes), the error-frame reader (one per live connection), and the
//! limbo manager (the in-flight window with its eviction tick).
//!
//! # Design notes
//! APNs is silent on success and emits at most one error frame before
//! closing the connection. The tasks therefore share a level-triggered
//! reconnect flag instead of a response protocol, and the in-flight window
//! treats silence past the ack timeout as acceptance.
mod limbo;
mod reader;
mod sender;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use apns_transport::client_tls_config;
use apns_wire::{Notification, Status};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::Config;
use crate::ids::IdAllocator;
use limbo::LimboTask;
use sender::SenderTask;

/// A notification the engine gave up on, delivered on the failures stream.
#[derive(Debug)]
pub struct BadNotification {
    pub notification: Notification,
    pub reason: FailureReason,
}

#[derive(Debug)]
pub enum FailureReason {
    /// The gateway rejected the notification with this status.
    Status(Status),
    /// The notification never reached the wire.
    Encode(String),
}

// Level-triggered reconnect request shared by the reader and the sender. The
// sender polls it at each dequeue rather than parking on it.
pub(crate) struct ReconnectSignal(AtomicBool);

impl ReconnectSignal {
    pub(crate) fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub(crate) fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

// One in-flight notification stamped with the instant it hit the socket.
pub(crate) struct SentNotification {
    pub(crate) notification: Notification,
    pub(crate) sent_at: Instant,
}

// Failure reports never block the engine; a full stream drops the report.
pub(crate) fn report_failure(
    failures_tx: &mpsc::Sender<BadNotification>,
    failure: BadNotification,
) {
    if let Err(err) = failures_tx.try_send(failure) {
        let dropped = err.into_inner();
        warn!(
            identifier = dropped.notification.identifier,
            "failures stream is full or closed, dropping report"
        );
    }
}

/// Handle to a running engine.
///
/// `start` loads the certificate synchronously and spawns the engine tasks;
/// the gateway connection itself is opened lazily on the first send. Must be
/// called from within a tokio runtime.
pub struct Client {
    queue_tx: mpsc::Sender<Notification>,
    failures: Mutex<Option<mpsc::Receiver<BadNotification>>>,
    stop_tx: mpsc::Sender<()>,
    stopped_rx: oneshot::Receiver<()>,
    ids: Arc<IdAllocator>,
}

impl Client {
    pub fn start(config: Config) -> Result<Self> {
        let tls = client_tls_config(&config.certificate, config.ca_certificates.as_deref())
            .context("load client certificate")?;

        let (queue_tx, queue_rx) = mpsc::channel(config.queue_size);
        let (sent_tx, sent_rx) = mpsc::channel(config.sent_buffer_size);
        let (responses_tx, responses_rx) = mpsc::channel(config.response_queue_size);
        let (failures_tx, failures_rx) = mpsc::channel(config.error_queue_size);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (sender_finished_tx, sender_finished_rx) = mpsc::channel(1);
        let (ack_finished_tx, ack_finished_rx) = mpsc::channel(1);
        let (stopped_tx, stopped_rx) = oneshot::channel();
        let reconnect = Arc::new(ReconnectSignal::new());

        tokio::spawn(sender::run_sender(SenderTask {
            gateway: config.gateway.clone(),
            tls,
            max_payload_size: config.max_payload_size,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            queue_rx,
            sent_tx,
            failures_tx: failures_tx.clone(),
            responses_tx,
            reconnect,
            stop_rx,
            sender_finished_tx,
            ack_finished_rx,
        }));

        tokio::spawn(limbo::run_limbo_manager(LimboTask {
            ack_timeout: config.ack_timeout,
            sent_rx,
            responses_rx,
            queue_tx: queue_tx.clone(),
            failures_tx,
            sender_finished_rx,
            ack_finished_tx,
            stopped_tx,
        }));

        debug!(gateway = %config.gateway, "engine started");
        Ok(Self {
            queue_tx,
            failures: Mutex::new(Some(failures_rx)),
            stop_tx,
            stopped_rx,
            ids: Arc::new(IdAllocator::default()),
        })
    }

    /// Build a notification with the next allocated identifier. Callers that
    /// manage their own identifiers can construct [`Notification`] directly.
    pub fn notification(&self, device_token: impl Into<String>) -> Notification {
        Notification::new(self.ids.next(), device_token)
    }

    pub fn allocator(&self) -> &Arc<IdAllocator> {
        &self.ids
    }

    /// Enqueue a notification for delivery. Blocks only when the input queue
    /// is full.
    pub async fn queue(&self, notification: Notification) -> Result<()> {
        self.queue_tx
            .send(notification)
            .await
            .map_err(|_| anyhow::anyhow!("engine is stopped"))
    }

    /// Take the failures stream. Yields `None` on the second call.
    pub fn take_failures(&self) -> Option<mpsc::Receiver<BadNotification>> {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    /// Drain the queue, wait for the in-flight window to empty, and tear the
    /// engine down.
    pub async fn stop(self) -> Result<()> {
        self.stop_tx
            .send(())
            .await
            .map_err(|_| anyhow::anyhow!("engine already stopped"))?;
        self.stopped_rx.await.context("engine stopped signal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_signal_is_level_triggered() {
        let signal = ReconnectSignal::new();
        assert!(!signal.take());
        signal.raise();
        signal.raise();
        assert!(signal.take());
        assert!(!signal.take());
    }

    #[tokio::test]
    async fn full_failures_stream_drops_reports() {
        let (tx, mut rx) = mpsc::channel(1);
        for identifier in [1, 2] {
            report_failure(
                &tx,
                BadNotification {
                    notification: Notification::new(identifier, "ab".repeat(32)),
                    reason: FailureReason::Encode("boom".to_string()),
                },
            );
        }
        let first = rx.recv().await.expect("first report");
        assert_eq!(first.notification.identifier, 1);
        assert!(rx.try_recv().is_err());
    }
}

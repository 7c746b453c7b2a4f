// Sender loop: frame, write, hand off to limbo, reconnect with backoff.
use std::sync::Arc;
use std::time::{Duration, Instant};

use apns_transport::{dial, GatewayStream};
use apns_wire::{ErrorFrame, Notification};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::reader::run_error_reader;
use super::{report_failure, BadNotification, FailureReason, ReconnectSignal, SentNotification};

pub(crate) struct SenderTask {
    pub(crate) gateway: String,
    pub(crate) tls: Arc<rustls::ClientConfig>,
    pub(crate) max_payload_size: usize,
    pub(crate) initial_backoff: Duration,
    pub(crate) max_backoff: Duration,
    pub(crate) queue_rx: mpsc::Receiver<Notification>,
    pub(crate) sent_tx: mpsc::Sender<SentNotification>,
    pub(crate) failures_tx: mpsc::Sender<BadNotification>,
    pub(crate) responses_tx: mpsc::Sender<ErrorFrame>,
    pub(crate) reconnect: Arc<ReconnectSignal>,
    pub(crate) stop_rx: mpsc::Receiver<()>,
    pub(crate) sender_finished_tx: mpsc::Sender<()>,
    pub(crate) ack_finished_rx: mpsc::Receiver<()>,
}

pub(crate) async fn run_sender(mut task: SenderTask) {
    let mut writer: Option<WriteHalf<GatewayStream>> = None;
    let mut reader: Option<JoinHandle<()>> = None;
    // A notification whose write failed; it is retried on the next
    // connection and never written twice to the same socket.
    let mut pending: Option<Notification> = None;
    let mut stopping = false;

    loop {
        let notification = match pending.take() {
            Some(notification) => notification,
            None => {
                if stopping && task.queue_rx.is_empty() {
                    let _ = task.sender_finished_tx.try_send(());
                }
                tokio::select! {
                    biased;
                    _ = task.stop_rx.recv(), if !stopping => {
                        // A closed stop channel (dropped handle) drains too.
                        debug!("stop requested, draining the input queue");
                        stopping = true;
                        continue;
                    }
                    ack = task.ack_finished_rx.recv(), if stopping => {
                        match ack {
                            // A late requeue can beat the ack; keep going.
                            Some(()) if !task.queue_rx.is_empty() => continue,
                            _ => break,
                        }
                    }
                    maybe = task.queue_rx.recv() => match maybe {
                        Some(notification) => notification,
                        None => break,
                    },
                }
            }
        };

        // The reconnect check sits between dequeue and write: anything the
        // reader flagged while we were parked must not ride the dead socket.
        if task.reconnect.take() {
            debug!("reconnect requested, tearing down the connection");
            teardown(&mut writer, &mut reader).await;
        }

        let frame = match notification.to_bytes(task.max_payload_size) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(
                    identifier = notification.identifier,
                    error = %err,
                    "notification failed to encode"
                );
                report_failure(
                    &task.failures_tx,
                    BadNotification {
                        notification,
                        reason: FailureReason::Encode(err.to_string()),
                    },
                );
                continue;
            }
        };

        if writer.is_none() {
            writer = Some(connect_with_backoff(&task, &mut reader).await);
        }

        let write_result = async {
            let stream = writer.as_mut().expect("connection just established");
            stream.write_all(&frame).await?;
            stream.flush().await
        }
        .await;

        match write_result {
            Ok(()) => {
                let entry = SentNotification {
                    notification,
                    sent_at: Instant::now(),
                };
                if task.sent_tx.send(entry).await.is_err() {
                    // Limbo is gone; the engine is coming down hard.
                    break;
                }
            }
            Err(err) => {
                warn!(
                    identifier = notification.identifier,
                    error = %err,
                    "write failed, scheduling reconnect"
                );
                task.reconnect.raise();
                pending = Some(notification);
            }
        }
    }

    teardown(&mut writer, &mut reader).await;
    debug!("sender stopped");
}

// Walk the exponential backoff until the gateway accepts a connection, then
// attach a fresh error-frame reader to its read half.
async fn connect_with_backoff(
    task: &SenderTask,
    reader: &mut Option<JoinHandle<()>>,
) -> WriteHalf<GatewayStream> {
    let mut backoff = task.initial_backoff;
    loop {
        match dial(&task.gateway, task.tls.clone()).await {
            Ok(stream) => {
                let (read_half, write_half) = tokio::io::split(stream);
                *reader = Some(tokio::spawn(run_error_reader(
                    read_half,
                    task.responses_tx.clone(),
                    task.reconnect.clone(),
                )));
                info!(gateway = %task.gateway, "connected to gateway");
                return write_half;
            }
            Err(err) => {
                warn!(
                    gateway = %task.gateway,
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64,
                    "connect failed, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(task.max_backoff);
            }
        }
    }
}

async fn teardown(
    writer: &mut Option<WriteHalf<GatewayStream>>,
    reader: &mut Option<JoinHandle<()>>,
) {
    if let Some(handle) = reader.take() {
        handle.abort();
    }
    if let Some(mut write_half) = writer.take() {
        let _ = write_half.shutdown().await;
    }
}

// The limbo manager: the ordered window of sent-but-unacknowledged
// notifications, its eviction tick, and error-frame bookkeeping.
use std::time::{Duration, Instant};

use apns_wire::{ErrorFrame, Notification, Status};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{report_failure, BadNotification, FailureReason, SentNotification};

pub(crate) struct LimboTask {
    pub(crate) ack_timeout: Duration,
    pub(crate) sent_rx: mpsc::Receiver<SentNotification>,
    pub(crate) responses_rx: mpsc::Receiver<ErrorFrame>,
    pub(crate) queue_tx: mpsc::Sender<Notification>,
    pub(crate) failures_tx: mpsc::Sender<BadNotification>,
    pub(crate) sender_finished_rx: mpsc::Receiver<()>,
    pub(crate) ack_finished_tx: mpsc::Sender<()>,
    pub(crate) stopped_tx: oneshot::Sender<()>,
}

pub(crate) async fn run_limbo_manager(mut task: LimboTask) {
    // Append order is write order; the error-frame scan depends on it.
    let mut limbo: Vec<SentNotification> = Vec::new();
    let mut stopping = false;
    let mut responses_open = true;
    let mut handshake_open = true;

    // Sub-second ack timeouts need a matching tick to ever observe them.
    let tick_period = task.ack_timeout.min(Duration::from_secs(1));
    let mut tick = tokio::time::interval(tick_period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            maybe = task.sent_rx.recv() => match maybe {
                Some(entry) => {
                    // New traffic cancels a stop in progress.
                    stopping = false;
                    limbo.push(entry);
                }
                None => break,
            },
            maybe = task.responses_rx.recv(), if responses_open => match maybe {
                Some(frame) => {
                    // Ingest everything already written before interpreting
                    // the reply, so the requeue scan sees full write order.
                    while let Ok(entry) = task.sent_rx.try_recv() {
                        limbo.push(entry);
                    }
                    handle_error_frame(&mut limbo, frame, &task.queue_tx, &task.failures_tx)
                        .await;
                }
                None => responses_open = false,
            },
            maybe = task.sender_finished_rx.recv(), if handshake_open => match maybe {
                Some(()) => {
                    debug!("sender drained, waiting for limbo to empty");
                    stopping = true;
                }
                None => handshake_open = false,
            },
            _ = tick.tick() => {
                evict_accepted(&mut limbo, task.ack_timeout);
                if stopping && limbo.is_empty() {
                    let _ = task.ack_finished_tx.try_send(());
                }
            }
        }
    }

    debug!("sent stream closed, limbo manager stopping");
    drop(task.failures_tx);
    let _ = task.stopped_tx.send(());
}

// Silence is acceptance: entries older than the ack timeout are evicted.
// The scan finds the earliest entry still inside its grace period and
// truncates everything older; an empty survivor set clears the window.
fn evict_accepted(limbo: &mut Vec<SentNotification>, ack_timeout: Duration) {
    let now = Instant::now();
    match limbo
        .iter()
        .position(|entry| now.duration_since(entry.sent_at) < ack_timeout)
    {
        Some(0) => {}
        Some(index) => {
            debug!(evicted = index, "declaring aged limbo entries accepted");
            limbo.drain(..index);
        }
        None => {
            if !limbo.is_empty() {
                debug!(evicted = limbo.len(), "declaring all limbo entries accepted");
                limbo.clear();
            }
        }
    }
}

// The gateway processed everything before the culprit, rejected the culprit,
// and discarded everything after it unread. Report the culprit (unless the
// server was just shutting down) and requeue the unread tail.
async fn handle_error_frame(
    limbo: &mut Vec<SentNotification>,
    frame: ErrorFrame,
    queue_tx: &mpsc::Sender<Notification>,
    failures_tx: &mpsc::Sender<BadNotification>,
) {
    let position = limbo
        .iter()
        .position(|entry| entry.notification.identifier == frame.identifier);

    let mut entries = std::mem::take(limbo);
    let tail = match position {
        Some(index) => {
            let tail = entries.split_off(index + 1);
            let culprit = entries.pop().expect("matched entry present");
            if frame.status == Status::Shutdown {
                debug!(
                    identifier = frame.identifier,
                    "gateway shutting down, nothing to report"
                );
            } else {
                info!(
                    identifier = frame.identifier,
                    status = %frame.status,
                    "notification rejected by gateway"
                );
                report_failure(
                    failures_tx,
                    BadNotification {
                        notification: culprit.notification,
                        reason: FailureReason::Status(frame.status),
                    },
                );
            }
            tail
        }
        None => {
            // The culprit already aged out of the window; assume everything
            // still here followed it and went unread.
            debug!(
                identifier = frame.identifier,
                "error frame for an identifier no longer in limbo"
            );
            entries
        }
    };

    for entry in tail {
        debug!(
            identifier = entry.notification.identifier,
            "requeueing notification discarded by the gateway"
        );
        if queue_tx.send(entry.notification).await.is_err() {
            warn!("input queue closed, dropping requeued notifications");
            break;
        }
    }
}

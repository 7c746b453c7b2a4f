// Error-frame reader: one per live connection, one frame per lifetime.
use std::sync::Arc;

use apns_transport::GatewayStream;
use apns_wire::{ErrorFrame, ERROR_FRAME_LEN};
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ReconnectSignal;

/// Block on the six-byte reply. The gateway sends at most one before
/// closing, so a successful read and an EOF both end in the same place:
/// raise the reconnect flag and exit. Everything after the read is
/// synchronous so a teardown abort cannot lose a decoded frame.
pub(crate) async fn run_error_reader(
    mut read_half: ReadHalf<GatewayStream>,
    responses_tx: mpsc::Sender<ErrorFrame>,
    reconnect: Arc<ReconnectSignal>,
) {
    let mut raw = [0u8; ERROR_FRAME_LEN];
    match read_half.read_exact(&mut raw).await {
        Ok(_) => {
            let frame = ErrorFrame::decode(raw);
            // Flag before publishing: once the limbo manager requeues the
            // tail, the sender must already see this stream as dead.
            reconnect.raise();
            debug!(
                status = %frame.status,
                identifier = frame.identifier,
                "error frame received"
            );
            if responses_tx.try_send(frame).is_err() {
                warn!("response queue unavailable, dropping error frame");
            }
        }
        Err(err) => {
            debug!(error = %err, "gateway stream ended without an error frame");
            reconnect.raise();
        }
    }
}

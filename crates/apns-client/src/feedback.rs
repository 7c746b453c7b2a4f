// Feedback Service reader: fixed-size records until the stream goes quiet.
use std::time::Duration;

use anyhow::{Context, Result};
use apns_transport::{client_tls_config, dial, GatewayStream};
use apns_wire::{FeedbackRecord, FEEDBACK_RECORD_LEN};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::Config;

/// Wait at most this long for the next feedback record.
pub const FEEDBACK_READ_TIMEOUT: Duration = Duration::from_secs(5);

const FEEDBACK_CHANNEL_DEPTH: usize = 64;

/// One pass over the Feedback Service: connects with the provider identity,
/// streams records until the first read error or a quiet deadline, then
/// shuts down. The closed record stream is the shutdown signal; a malformed
/// record fails the whole session via [`FeedbackSession::finish`].
///
/// Apple monitors whether providers honor feedback, so tokens surfaced here
/// should stop receiving traffic.
pub struct FeedbackSession {
    records_rx: mpsc::Receiver<FeedbackRecord>,
    handle: JoinHandle<Result<()>>,
}

impl FeedbackSession {
    pub async fn connect(feedback_gateway: &str, config: &Config) -> Result<Self> {
        let tls = client_tls_config(&config.certificate, config.ca_certificates.as_deref())
            .context("load client certificate")?;
        let stream = dial(feedback_gateway, tls)
            .await
            .context("connect to feedback service")?;
        let (records_tx, records_rx) = mpsc::channel(FEEDBACK_CHANNEL_DEPTH);
        let handle = tokio::spawn(read_records(stream, records_tx));
        Ok(Self { records_rx, handle })
    }

    /// The next stale device token, or `None` once the service has drained.
    pub async fn recv(&mut self) -> Option<FeedbackRecord> {
        self.records_rx.recv().await
    }

    /// Wait for the reader to finish and surface a decode failure, if any.
    pub async fn finish(self) -> Result<()> {
        drop(self.records_rx);
        self.handle.await.context("feedback reader task")?
    }
}

async fn read_records(
    mut stream: GatewayStream,
    records_tx: mpsc::Sender<FeedbackRecord>,
) -> Result<()> {
    let mut raw = [0u8; FEEDBACK_RECORD_LEN];
    loop {
        match tokio::time::timeout(FEEDBACK_READ_TIMEOUT, stream.read_exact(&mut raw)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                debug!(error = %err, "feedback stream ended");
                return Ok(());
            }
            Err(_) => {
                debug!("feedback service went quiet, finishing");
                return Ok(());
            }
        }
        let record = FeedbackRecord::decode(raw).context("malformed feedback record")?;
        debug!(
            timestamp = record.timestamp,
            device_token = %record.device_token,
            "stale device token"
        );
        if records_tx.send(record).await.is_err() {
            return Ok(());
        }
    }
}

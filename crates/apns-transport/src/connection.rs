// Reconnectable TLS connection slot with keepalive and liveness probing.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

use crate::{dial, Result, TransportError};

/// Liveness and recycling knobs for a pooled [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Force-recycle a connection after this long regardless of traffic.
    pub keepalive: Duration,
    /// Probe the socket every N writes.
    pub peek_frequency: u64,
    /// How long a probe waits before declaring the socket quiet-but-alive.
    pub peek_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(10 * 60),
            peek_frequency: 100,
            peek_timeout: Duration::from_millis(500),
        }
    }
}

struct OpenStream {
    stream: TlsStream<TcpStream>,
    connected_at: Instant,
}

/// One TLS stream that can be opened lazily and re-opened after failures.
///
/// APNs closes the connection silently after any error frame, so a pooled
/// sender that never reads would otherwise keep writing into a half-closed
/// socket. The probe attempts a one-byte read under a short timeout: only
/// end-of-stream counts as dead, anything else (including the timeout)
/// means the socket is still usable.
pub struct Connection {
    config: ConnectionConfig,
    state: Mutex<Option<OpenStream>>,
    write_count: AtomicU64,
    // Probe latch: verdict of the last completed probe, keyed by the
    // write-count epoch that made it due. Concurrent callers at the same
    // epoch run one probe and share the verdict.
    probe: Mutex<Option<(u64, bool)>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(None),
            write_count: AtomicU64::new(0),
            probe: Mutex::new(None),
        }
    }

    /// Dial the gateway and replace whatever stream was held before.
    pub async fn open(&self, gateway: &str, tls: Arc<rustls::ClientConfig>) -> Result<()> {
        let stream = dial(gateway, tls).await?;
        {
            // Never hold both locks at once; the probe path takes them in
            // the opposite order.
            let mut state = self.state.lock().await;
            *state = Some(OpenStream {
                stream,
                connected_at: Instant::now(),
            });
        }
        self.write_count.store(0, Ordering::SeqCst);
        *self.probe.lock().await = None;
        Ok(())
    }

    /// A connection is open iff it holds a stream, is younger than the
    /// keepalive window, and its most recent due probe passed.
    pub async fn is_open(&self) -> bool {
        let connected_at = match self.state.lock().await.as_ref() {
            Some(open) => open.connected_at,
            None => return false,
        };
        if connected_at.elapsed() >= self.config.keepalive {
            debug!("connection exceeded keepalive window");
            return false;
        }

        let count = self.write_count.load(Ordering::SeqCst);
        if count > 0 && count % self.config.peek_frequency == 0 {
            let epoch = count / self.config.peek_frequency;
            if !self.probe_epoch(epoch).await {
                return false;
            }
            // The probe may have torn the stream down under us.
            if self.state.lock().await.is_none() {
                return false;
            }
        }
        true
    }

    // Run at most one probe per due epoch; late arrivals observe the stored
    // verdict instead of racing the socket.
    async fn probe_epoch(&self, epoch: u64) -> bool {
        let mut latch = self.probe.lock().await;
        if let Some((done, verdict)) = *latch {
            if done == epoch {
                return verdict;
            }
        }
        let verdict = self.peek().await.is_ok();
        *latch = Some((epoch, verdict));
        verdict
    }

    /// One-byte liveness probe. Only end-of-stream is a failure; a timeout
    /// or a stray readable byte both mean the peer is still there. A byte
    /// consumed here was either the start of a reply this write-only slot
    /// would never read, or TLS close noise.
    pub async fn peek(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let open = state.as_mut().ok_or(TransportError::NoConnection)?;
        let mut byte = [0u8; 1];
        match tokio::time::timeout(self.config.peek_timeout, open.stream.read(&mut byte)).await {
            Ok(Ok(0)) => {
                warn!("liveness probe hit end of stream, closing connection");
                *state = None;
                self.write_count.store(0, Ordering::SeqCst);
                Err(TransportError::Eof)
            }
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => Ok(()),
        }
    }

    /// Write the whole buffer, counting the write for probe scheduling.
    pub async fn write(&self, bytes: &[u8]) -> Result<usize> {
        if !self.is_open().await {
            return Err(TransportError::NoConnection);
        }
        self.write_count.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        let open = state.as_mut().ok_or(TransportError::NoConnection)?;
        open.stream.write_all(bytes).await?;
        open.stream.flush().await?;
        Ok(bytes.len())
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.is_open().await {
            return Err(TransportError::NoConnection);
        }
        let mut state = self.state.lock().await;
        let open = state.as_mut().ok_or(TransportError::NoConnection)?;
        Ok(open.stream.read(buf).await?)
    }

    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(mut open) = state.take() {
            self.write_count.store(0, Ordering::SeqCst);
            open.stream.shutdown().await?;
        }
        Ok(())
    }

    pub async fn local_addr(&self) -> Result<SocketAddr> {
        let state = self.state.lock().await;
        let open = state.as_ref().ok_or(TransportError::NoConnection)?;
        Ok(open.stream.get_ref().0.local_addr()?)
    }

    pub async fn remote_addr(&self) -> Result<SocketAddr> {
        let state = self.state.lock().await;
        let open = state.as_ref().ok_or(TransportError::NoConnection)?;
        Ok(open.stream.get_ref().0.peer_addr()?)
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }
}

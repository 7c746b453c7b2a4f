// Round-robin pool of independent gateway connections.
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use apns_transport::{client_tls_config, Connection, TransportError};
use tracing::debug;

use crate::config::Config;

/// Fixed-size pool of [`Connection`] slots with round-robin dispatch.
///
/// Slots are opened lazily, recycled when their keepalive window or a
/// liveness probe fails, and skipped over by [`ConnectionPool::write`] when
/// they cannot take traffic.
pub struct ConnectionPool {
    size: usize,
    // 1-indexed cursor; advanced under the lock, slots opened outside it.
    position: Mutex<usize>,
    gateway: String,
    tls: Arc<rustls::ClientConfig>,
    connections: Vec<Arc<Connection>>,
}

impl ConnectionPool {
    pub fn new(size: usize, config: &Config) -> Result<Self> {
        anyhow::ensure!(size > 0, "connection pool needs at least one slot");
        let tls = client_tls_config(&config.certificate, config.ca_certificates.as_deref())
            .context("load client certificate")?;
        let connections = (0..size)
            .map(|_| Arc::new(Connection::new(config.connection.clone())))
            .collect();
        Ok(Self {
            size,
            position: Mutex::new(0),
            gateway: config.gateway.clone(),
            tls,
            connections,
        })
    }

    /// Pick the next slot and make sure it is open.
    pub async fn get(&self) -> Result<Arc<Connection>, TransportError> {
        let index = {
            let mut position = self
                .position
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *position = *position % self.size + 1;
            *position - 1
        };
        let connection = self.connections[index].clone();
        if !connection.is_open().await {
            debug!(slot = index, gateway = %self.gateway, "opening pool connection");
            connection.open(&self.gateway, self.tls.clone()).await?;
        }
        Ok(connection)
    }

    /// Write the buffer on the first healthy slot, trying each slot at most
    /// once and closing the ones that fail under us.
    pub async fn write(&self, bytes: &[u8]) -> Result<(Arc<Connection>, usize)> {
        let mut last_error: Option<TransportError> = None;
        for _ in 0..self.size {
            let connection = match self.get().await {
                Ok(connection) => connection,
                Err(err) => {
                    last_error = Some(err);
                    continue;
                }
            };
            match connection.write(bytes).await {
                Ok(0) if !bytes.is_empty() => {
                    let _ = connection.close().await;
                }
                Ok(written) => return Ok((connection, written)),
                Err(err) => {
                    let _ = connection.close().await;
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err).context("write on all pool connections failed"),
            None => Err(anyhow::anyhow!(
                "no bytes written on any pool connection - expected {}",
                bytes.len()
            )),
        }
    }

    /// Close every slot; the first failure is returned after all slots have
    /// been visited.
    pub async fn close(&self) -> Result<()> {
        let mut first_error = None;
        for connection in &self.connections {
            if let Err(err) = connection.close().await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err).context("close pool connection"),
            None => Ok(()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

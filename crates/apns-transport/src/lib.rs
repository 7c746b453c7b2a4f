// TLS transport for the legacy APNs gateway and feedback service.
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

mod connection;
mod tls;

pub use connection::{Connection, ConnectionConfig};
pub use tls::{client_tls_config, CertificateSource};

/// How long a TLS handshake may take before the dial is abandoned.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// The client-side TLS stream [`dial`] produces.
pub type GatewayStream = TlsStream<TcpStream>;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("no connection")]
    NoConnection,
    #[error("gateway must be host:port, got {0:?}")]
    InvalidGateway(String),
    #[error("no certificate found in PEM input")]
    MissingCertificate,
    #[error("no private key found in PEM input")]
    MissingKey,
    #[error("TLS handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("connection closed by peer")]
    Eof,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Dial `host:port`, wrap the socket in TLS, and complete the handshake
/// under [`HANDSHAKE_TIMEOUT`]. The server name is the host part of the
/// gateway; no port is ever inferred.
pub async fn dial(gateway: &str, tls: Arc<rustls::ClientConfig>) -> Result<GatewayStream> {
    let (host, _port) = gateway
        .rsplit_once(':')
        .ok_or_else(|| TransportError::InvalidGateway(gateway.to_string()))?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| TransportError::InvalidGateway(gateway.to_string()))?;

    let tcp = TcpStream::connect(gateway).await?;
    let connector = TlsConnector::from(tls);
    let stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, connector.connect(server_name, tcp))
        .await
        .map_err(|_| TransportError::HandshakeTimeout(HANDSHAKE_TIMEOUT))??;
    debug!(gateway, "TLS session established");
    Ok(stream)
}

// In-process TLS gateway and feedback service for engine tests.
#![allow(dead_code)]
use std::sync::Arc;

use apns_client::{CertificateSource, Config};
use apns_wire::{ErrorFrame, Notification, Status};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

pub struct SeenFrame {
    pub connection: usize,
    pub notification: Notification,
}

/// What one accepted gateway connection does. Connections past the scripted
/// list act as sinks, so a reconnecting client always finds a listener.
#[derive(Clone, Copy)]
pub enum ConnectionScript {
    /// Read this many frames, reply with an error frame, close cleanly.
    ErrorAfter {
        frames: usize,
        status: Status,
        identifier: u32,
    },
    /// Read frames until the client goes away.
    Sink,
}

pub struct MockGateway {
    pub gateway: String,
    pub ca_pem: Vec<u8>,
    pub seen: mpsc::UnboundedReceiver<SeenFrame>,
}

pub struct MockFeedback {
    pub gateway: String,
    pub ca_pem: Vec<u8>,
}

pub fn client_identity() -> CertificateSource {
    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(vec!["provider".into()]).expect("client cert");
    CertificateSource::Inline {
        certificate_pem: cert.pem().into_bytes(),
        key_pem: signing_key.serialize_pem().into_bytes(),
    }
}

pub fn config_for(gateway: &str, ca_pem: &[u8]) -> Config {
    let mut config = Config::new(gateway, client_identity());
    config.ca_certificates = Some(ca_pem.to_vec());
    config
}

fn server_identity() -> (TlsAcceptor, Vec<u8>) {
    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(vec!["localhost".into()]).expect("server cert");
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![cert.der().clone()],
            rustls::pki_types::PrivatePkcs8KeyDer::from(signing_key.serialize_der()).into(),
        )
        .expect("server config");
    (TlsAcceptor::from(Arc::new(config)), cert.pem().into_bytes())
}

pub async fn spawn_gateway(scripts: Vec<ConnectionScript>) -> MockGateway {
    let (acceptor, ca_pem) = server_identity();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(accept_loop(listener, acceptor, scripts, seen_tx));

    MockGateway {
        gateway: format!("localhost:{port}"),
        ca_pem,
        seen: seen_rx,
    }
}

/// Reserve a free port, then release it so a deferred gateway can claim it.
pub fn reserve_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    probe.local_addr().expect("probe addr").port()
}

/// A gateway that only starts listening after `delay`, for exercising the
/// connect backoff path.
pub fn spawn_gateway_deferred(
    port: u16,
    delay: std::time::Duration,
    scripts: Vec<ConnectionScript>,
) -> MockGateway {
    let (acceptor, ca_pem) = server_identity();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Ok(listener) = TcpListener::bind(("127.0.0.1", port)).await else {
            return;
        };
        accept_loop(listener, acceptor, scripts, seen_tx).await;
    });

    MockGateway {
        gateway: format!("localhost:{port}"),
        ca_pem,
        seen: seen_rx,
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    scripts: Vec<ConnectionScript>,
    seen_tx: mpsc::UnboundedSender<SeenFrame>,
) {
    let mut scripts = scripts.into_iter();
    let mut connection = 0usize;
    loop {
        let Ok((tcp, _)) = listener.accept().await else {
            return;
        };
        let script = scripts.next().unwrap_or(ConnectionScript::Sink);
        let acceptor = acceptor.clone();
        let seen_tx = seen_tx.clone();
        let index = connection;
        connection += 1;
        tokio::spawn(async move {
            let Ok(stream) = acceptor.accept(tcp).await else {
                return;
            };
            run_script(stream, script, index, seen_tx).await;
        });
    }
}

async fn run_script(
    mut stream: TlsStream<TcpStream>,
    script: ConnectionScript,
    connection: usize,
    seen_tx: mpsc::UnboundedSender<SeenFrame>,
) {
    match script {
        ConnectionScript::ErrorAfter {
            frames,
            status,
            identifier,
        } => {
            for _ in 0..frames {
                match read_frame(&mut stream).await {
                    Ok(notification) => {
                        let _ = seen_tx.send(SeenFrame {
                            connection,
                            notification,
                        });
                    }
                    Err(_) => return,
                }
            }
            let reply = ErrorFrame { status, identifier }.encode();
            let _ = stream.write_all(&reply).await;
            let _ = stream.shutdown().await;
        }
        ConnectionScript::Sink => {
            while let Ok(notification) = read_frame(&mut stream).await {
                let _ = seen_tx.send(SeenFrame {
                    connection,
                    notification,
                });
            }
        }
    }
}

/// Read one v1 push frame off the stream field by field.
pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Notification> {
    let mut head = [0u8; 11];
    stream.read_exact(&mut head).await?;
    let token_len = usize::from(u16::from_be_bytes([head[9], head[10]]));
    let mut token = vec![0u8; token_len];
    stream.read_exact(&mut token).await?;
    let mut payload_len = [0u8; 2];
    stream.read_exact(&mut payload_len).await?;
    let mut payload = vec![0u8; usize::from(u16::from_be_bytes(payload_len))];
    stream.read_exact(&mut payload).await?;

    let mut frame = Vec::with_capacity(head.len() + token.len() + 2 + payload.len());
    frame.extend_from_slice(&head);
    frame.extend_from_slice(&token);
    frame.extend_from_slice(&payload_len);
    frame.extend_from_slice(&payload);
    Notification::from_bytes(&frame)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

/// One-shot feedback service: serves the raw payload to the first client
/// and closes. Malformed-record tests pass hand-built bytes.
pub async fn spawn_feedback_server(payload: Vec<u8>) -> MockFeedback {
    let (acceptor, ca_pem) = server_identity();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();

    tokio::spawn(async move {
        let Ok((tcp, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut stream) = acceptor.accept(tcp).await else {
            return;
        };
        let _ = stream.write_all(&payload).await;
        let _ = stream.shutdown().await;
    });

    MockFeedback {
        gateway: format!("localhost:{port}"),
        ca_pem,
    }
}

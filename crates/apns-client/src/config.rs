// Engine defaults and environment overrides.
use std::time::Duration;

use apns_transport::{CertificateSource, ConnectionConfig};
use apns_wire::MAX_PAYLOAD_SIZE;

pub const PRODUCTION_GATEWAY: &str = "gateway.push.apple.com:2195";
pub const SANDBOX_GATEWAY: &str = "gateway.sandbox.push.apple.com:2195";
pub const PRODUCTION_FEEDBACK_GATEWAY: &str = "feedback.push.apple.com:2196";
pub const SANDBOX_FEEDBACK_GATEWAY: &str = "feedback.sandbox.push.apple.com:2196";

pub(crate) const DEFAULT_QUEUE_SIZE: usize = 10_000;
pub(crate) const DEFAULT_SENT_BUFFER_SIZE: usize = 10_000;
pub(crate) const DEFAULT_RESPONSE_QUEUE_SIZE: usize = 10_000;
// Failures beyond this buffer are dropped so sending never stalls on an
// inattentive consumer.
pub(crate) const DEFAULT_ERROR_QUEUE_SIZE: usize = 1_000;

pub(crate) const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
pub(crate) const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(20);

/// Engine configuration. `Config::new` applies the defaults above plus any
/// `APNS_*` environment overrides; fields are public for direct tuning.
#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` of the push gateway; no port is inferred.
    pub gateway: String,
    pub certificate: CertificateSource,
    /// Optional PEM bundle replacing the platform trust store.
    pub ca_certificates: Option<Vec<u8>>,
    /// Grace period after which an unanswered notification counts as accepted.
    pub ack_timeout: Duration,
    pub queue_size: usize,
    pub sent_buffer_size: usize,
    pub response_queue_size: usize,
    pub error_queue_size: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Keepalive and liveness knobs shared with pooled connections.
    pub connection: ConnectionConfig,
    pub max_payload_size: usize,
}

impl Config {
    pub fn new(gateway: impl Into<String>, certificate: CertificateSource) -> Self {
        let mut config = Self {
            gateway: gateway.into(),
            certificate,
            ca_certificates: None,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            queue_size: DEFAULT_QUEUE_SIZE,
            sent_buffer_size: DEFAULT_SENT_BUFFER_SIZE,
            response_queue_size: DEFAULT_RESPONSE_QUEUE_SIZE,
            error_queue_size: DEFAULT_ERROR_QUEUE_SIZE,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            connection: ConnectionConfig::default(),
            max_payload_size: MAX_PAYLOAD_SIZE,
        };
        if let Some(value) = read_usize_env("APNS_QUEUE_SIZE") {
            config.queue_size = value;
        }
        if let Some(value) = read_usize_env("APNS_SENT_BUFFER_SIZE") {
            config.sent_buffer_size = value;
        }
        if let Some(value) = read_usize_env("APNS_RESPONSE_QUEUE_SIZE") {
            config.response_queue_size = value;
        }
        if let Some(value) = read_usize_env("APNS_ERROR_QUEUE_SIZE") {
            config.error_queue_size = value;
        }
        if let Some(value) = read_usize_env("APNS_MAX_PAYLOAD_SIZE") {
            config.max_payload_size = value;
        }
        config
    }
}

fn read_usize_env(name: &str) -> Option<usize> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(name, value, "ignoring unparseable environment override");
            None
        }
    }
}

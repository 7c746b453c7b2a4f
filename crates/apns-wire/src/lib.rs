// Wire format for the legacy APNs binary provider protocol.
use bytes::{Buf, Bytes};

mod notification;
mod payload;

pub use notification::{DecodeError, EncodeError, Notification};
pub use payload::{Alert, AlertDictionary, Payload};

/// Command byte opening every v1 push frame.
pub const PUSH_COMMAND: u8 = 1;
/// Command byte opening the asynchronous error reply.
pub const ERROR_COMMAND: u8 = 8;

/// Raw device token length after hex decoding.
pub const DEVICE_TOKEN_LEN: usize = 32;
/// Fixed bytes surrounding the JSON body in a push frame.
pub const FRAME_OVERHEAD: usize = 1 + 4 + 4 + 2 + DEVICE_TOKEN_LEN + 2;

pub const ERROR_FRAME_LEN: usize = 6;
pub const FEEDBACK_RECORD_LEN: usize = 38;

/// Payload ceiling for devices running iOS 7 and earlier.
pub const MAX_PAYLOAD_SIZE: usize = 256;
/// Payload ceiling for devices running iOS 8 and later.
pub const MAX_PAYLOAD_SIZE_IOS8: usize = 2048;

/// Status byte carried by an [`ErrorFrame`].
///
/// ```
/// use apns_wire::Status;
///
/// assert_eq!(Status::from_raw(8), Status::InvalidToken);
/// assert_eq!(Status::InvalidToken.to_string(), "INVALID_TOKEN");
/// assert_eq!(Status::from_raw(9), Status::Unknown(9));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    NoErrors,
    ProcessingError,
    MissingDeviceToken,
    MissingTopic,
    MissingPayload,
    InvalidTokenSize,
    InvalidTopicSize,
    InvalidPayloadSize,
    InvalidToken,
    /// Graceful server-initiated close; never reported as a notification failure.
    Shutdown,
    Unknown(u8),
}

impl Status {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Status::NoErrors,
            1 => Status::ProcessingError,
            2 => Status::MissingDeviceToken,
            3 => Status::MissingTopic,
            4 => Status::MissingPayload,
            5 => Status::InvalidTokenSize,
            6 => Status::InvalidTopicSize,
            7 => Status::InvalidPayloadSize,
            8 => Status::InvalidToken,
            10 => Status::Shutdown,
            other => Status::Unknown(other),
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            Status::NoErrors => 0,
            Status::ProcessingError => 1,
            Status::MissingDeviceToken => 2,
            Status::MissingTopic => 3,
            Status::MissingPayload => 4,
            Status::InvalidTokenSize => 5,
            Status::InvalidTopicSize => 6,
            Status::InvalidPayloadSize => 7,
            Status::InvalidToken => 8,
            Status::Shutdown => 10,
            Status::Unknown(raw) => raw,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Status::NoErrors => "NO_ERRORS",
            Status::ProcessingError => "PROCESSING_ERROR",
            Status::MissingDeviceToken => "MISSING_DEVICE_TOKEN",
            Status::MissingTopic => "MISSING_TOPIC",
            Status::MissingPayload => "MISSING_PAYLOAD",
            Status::InvalidTokenSize => "INVALID_TOKEN_SIZE",
            Status::InvalidTopicSize => "INVALID_TOPIC_SIZE",
            Status::InvalidPayloadSize => "INVALID_PAYLOAD_SIZE",
            Status::InvalidToken => "INVALID_TOKEN",
            Status::Shutdown => "SHUTDOWN",
            Status::Unknown(_) => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The single asynchronous reply APNs sends before closing the connection.
///
/// ```
/// use apns_wire::{ErrorFrame, Status};
///
/// let frame = ErrorFrame { status: Status::InvalidToken, identifier: 12 };
/// let decoded = ErrorFrame::decode(frame.encode());
/// assert_eq!(decoded, frame);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFrame {
    pub status: Status,
    pub identifier: u32,
}

impl ErrorFrame {
    /// Decode the six-byte reply. A stray command byte is logged and the
    /// remaining five bytes are trusted anyway; gateways have been observed
    /// emitting the frame with a mangled command under load.
    pub fn decode(raw: [u8; ERROR_FRAME_LEN]) -> Self {
        if raw[0] != ERROR_COMMAND {
            tracing::warn!(command = raw[0], "unexpected error frame command");
        }
        let identifier = u32::from_be_bytes([raw[2], raw[3], raw[4], raw[5]]);
        Self {
            status: Status::from_raw(raw[1]),
            identifier,
        }
    }

    pub fn encode(&self) -> [u8; ERROR_FRAME_LEN] {
        let id = self.identifier.to_be_bytes();
        [
            ERROR_COMMAND,
            self.status.as_raw(),
            id[0],
            id[1],
            id[2],
            id[3],
        ]
    }
}

/// One record from the Feedback Service: a device token Apple no longer
/// wants traffic for, stamped with the time it went stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRecord {
    pub timestamp: u32,
    pub device_token: String,
}

impl FeedbackRecord {
    /// Decode the fixed 38-byte record `[timestamp][token_len=32][token]`.
    pub fn decode(raw: [u8; FEEDBACK_RECORD_LEN]) -> Result<Self, DecodeError> {
        let mut buf = Bytes::copy_from_slice(&raw);
        let timestamp = buf.get_u32();
        let token_len = buf.get_u16();
        if usize::from(token_len) != DEVICE_TOKEN_LEN {
            return Err(DecodeError::BadTokenLength(token_len));
        }
        Ok(Self {
            timestamp,
            device_token: hex::encode(buf.chunk()),
        })
    }

    pub fn encode(&self) -> Result<[u8; FEEDBACK_RECORD_LEN], EncodeError> {
        let token = decode_device_token(&self.device_token)?;
        let mut raw = [0u8; FEEDBACK_RECORD_LEN];
        raw[0..4].copy_from_slice(&self.timestamp.to_be_bytes());
        raw[4..6].copy_from_slice(&(DEVICE_TOKEN_LEN as u16).to_be_bytes());
        raw[6..].copy_from_slice(&token);
        Ok(raw)
    }
}

// Hex-decode a device token, insisting on the exact on-wire length.
pub(crate) fn decode_device_token(token: &str) -> Result<[u8; DEVICE_TOKEN_LEN], EncodeError> {
    let raw = hex::decode(token).map_err(|_| EncodeError::BadTokenEncoding)?;
    raw.try_into().map_err(|_| EncodeError::BadTokenEncoding)
}

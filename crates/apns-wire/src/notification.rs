// The addressable push request and its binary v1 framing.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{decode_device_token, Payload, DEVICE_TOKEN_LEN, FRAME_OVERHEAD, PUSH_COMMAND};

/// Per-notification encoding failure. No wire bytes are written when any of
/// these occur.
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("device token is not {DEVICE_TOKEN_LEN} bytes of hex")]
    BadTokenEncoding,
    #[error("payload serialization failed: {0}")]
    BadPayload(#[from] serde_json::Error),
    #[error("payload exceeds the size limit by {extra} bytes")]
    PayloadTooLarge { extra: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("incomplete frame")]
    Incomplete,
    #[error("unexpected command byte {0}")]
    UnexpectedCommand(u8),
    #[error("invalid device token length {0}")]
    BadTokenLength(u16),
    #[error("payload is not valid JSON: {0}")]
    BadPayload(#[from] serde_json::Error),
}

/// One push request addressed to a single device.
///
/// The root JSON object always carries the `aps` dictionary; arbitrary
/// caller keys sit alongside it.
///
/// ```
/// use apns_wire::{Alert, Notification, Payload, MAX_PAYLOAD_SIZE};
///
/// let mut notification = Notification::new(7, "ab".repeat(32));
/// notification.set_payload(&Payload {
///     alert: Some(Alert::from("You have mail!")),
///     ..Payload::default()
/// }).expect("payload");
/// let frame = notification.to_bytes(MAX_PAYLOAD_SIZE).expect("frame");
/// assert_eq!(frame[0], 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub identifier: u32,
    /// Absolute epoch seconds; zero means "attempt once, never store".
    pub expiry: u32,
    pub device_token: String,
    root: Map<String, Value>,
}

impl Notification {
    pub fn new(identifier: u32, device_token: impl Into<String>) -> Self {
        let mut root = Map::new();
        root.insert("aps".to_string(), Value::Object(Map::new()));
        Self {
            identifier,
            expiry: 0,
            device_token: device_token.into(),
            root,
        }
    }

    /// Install the `aps` dictionary.
    pub fn set_payload(&mut self, payload: &Payload) -> Result<(), EncodeError> {
        self.set("aps", payload)
    }

    /// Attach an arbitrary caller key at the JSON root.
    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<(), EncodeError> {
        let value = serde_json::to_value(value)?;
        self.root.insert(key.into(), value);
        Ok(())
    }

    /// Look up a root key; absent keys yield `None`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn payload_json(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(&self.root)?)
    }

    pub fn payload_string(&self) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(&self.root)?)
    }

    /// Encode the v1 binary frame. Fails without side effects when the token
    /// is malformed or the JSON body exceeds `max_payload_size`.
    pub fn to_bytes(&self, max_payload_size: usize) -> Result<Bytes, EncodeError> {
        let token = decode_device_token(&self.device_token)?;
        let payload = self.payload_json()?;
        if payload.len() > max_payload_size {
            return Err(EncodeError::PayloadTooLarge {
                extra: payload.len() - max_payload_size,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
        buf.put_u8(PUSH_COMMAND);
        buf.put_u32(self.identifier);
        buf.put_u32(self.expiry);
        buf.put_u16(DEVICE_TOKEN_LEN as u16);
        buf.put_slice(&token);
        buf.put_u16(payload.len() as u16);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decode a v1 frame produced by [`Notification::to_bytes`]. Trailing
    /// bytes beyond the declared payload length are ignored.
    pub fn from_bytes(input: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = input;
        if buf.remaining() < FRAME_OVERHEAD {
            return Err(DecodeError::Incomplete);
        }
        let command = buf.get_u8();
        if command != PUSH_COMMAND {
            return Err(DecodeError::UnexpectedCommand(command));
        }
        let identifier = buf.get_u32();
        let expiry = buf.get_u32();
        let token_len = buf.get_u16();
        if usize::from(token_len) != DEVICE_TOKEN_LEN {
            return Err(DecodeError::BadTokenLength(token_len));
        }
        let mut token = [0u8; DEVICE_TOKEN_LEN];
        buf.copy_to_slice(&mut token);
        let payload_len = usize::from(buf.get_u16());
        if buf.remaining() < payload_len {
            return Err(DecodeError::Incomplete);
        }
        let root: Map<String, Value> = serde_json::from_slice(&buf.chunk()[..payload_len])?;
        Ok(Self {
            identifier,
            expiry,
            device_token: hex::encode(token),
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Alert, AlertDictionary, MAX_PAYLOAD_SIZE};

    fn mock_token() -> String {
        format!("af7685af756476543987af{}", "00".repeat(21))
    }

    fn mock_payload() -> Payload {
        Payload {
            alert: Some(Alert::from("You have mail!")),
            badge: Some(42),
            sound: Some("bingbong.aiff".to_string()),
            ..Payload::default()
        }
    }

    #[test]
    fn basic_alert_frames_to_expected_sizes() {
        let mut notification = Notification::new(1, mock_token());
        notification.set_payload(&mock_payload()).expect("payload");

        let json = notification.payload_string().expect("json");
        assert_eq!(
            json,
            r#"{"aps":{"alert":"You have mail!","badge":42,"sound":"bingbong.aiff"}}"#
        );
        assert_eq!(json.len(), 69);

        let frame = notification.to_bytes(MAX_PAYLOAD_SIZE).expect("frame");
        assert_eq!(frame.len(), FRAME_OVERHEAD + 69);
        assert_eq!(frame.len(), 114);
    }

    #[test]
    fn dictionary_alert_frames_to_expected_sizes() {
        let mut payload = mock_payload();
        payload.alert = Some(Alert::Dict(AlertDictionary {
            body: Some("Complex Message".to_string()),
            action_loc_key: Some("Play a Game!".to_string()),
            loc_key: Some("localized key".to_string()),
            loc_args: vec!["localized args".to_string()],
            launch_image: Some("image.jpg".to_string()),
            ..AlertDictionary::default()
        }));

        let mut notification = Notification::new(2, mock_token());
        notification.set_payload(&payload).expect("payload");

        assert_eq!(notification.payload_json().expect("json").len(), 194);
        let frame = notification.to_bytes(MAX_PAYLOAD_SIZE).expect("frame");
        assert_eq!(frame.len(), FRAME_OVERHEAD + 194);
    }

    #[test]
    fn zero_badge_is_not_omitted() {
        let mut notification = Notification::new(3, mock_token());
        notification
            .set_payload(&Payload {
                badge: Some(0),
                ..Payload::default()
            })
            .expect("payload");
        assert_eq!(
            notification.payload_string().expect("json"),
            r#"{"aps":{"badge":0}}"#
        );
    }

    #[test]
    fn unset_badge_yields_empty_aps() {
        let mut notification = Notification::new(4, mock_token());
        notification.set_payload(&Payload::default()).expect("payload");
        assert_eq!(notification.payload_string().expect("json"), r#"{"aps":{}}"#);
    }

    #[test]
    fn aps_is_present_before_any_payload_is_set() {
        let notification = Notification::new(4, mock_token());
        assert_eq!(notification.payload_string().expect("json"), r#"{"aps":{}}"#);
    }

    #[test]
    fn custom_properties_sit_beside_aps() {
        let mut notification = Notification::new(5, mock_token());
        notification.set_payload(&mock_payload()).expect("payload");
        notification.set("foo", "bar").expect("set");
        notification.set("doctor", "who?").expect("set");
        notification.set("the_ultimate_answer", 42).expect("set");

        let json: Value =
            serde_json::from_slice(&notification.payload_json().expect("json")).expect("parse");
        assert_eq!(json["foo"], "bar");
        assert_eq!(json["doctor"], "who?");
        assert_eq!(json["the_ultimate_answer"], 42);
        assert_eq!(json["aps"]["badge"], 42);

        assert_eq!(notification.get("foo"), Some(&Value::from("bar")));
        assert_eq!(notification.get("not_set"), None);
    }

    #[test]
    fn oversize_payload_reports_overflow() {
        let mut notification = Notification::new(6, mock_token());
        notification.set_payload(&mock_payload()).expect("payload");
        notification
            .set("filler", "x".repeat(MAX_PAYLOAD_SIZE))
            .expect("set");

        let json_len = notification.payload_json().expect("json").len();
        let err = notification
            .to_bytes(MAX_PAYLOAD_SIZE)
            .expect_err("oversize");
        match err {
            EncodeError::PayloadTooLarge { extra } => {
                assert_eq!(extra, json_len - MAX_PAYLOAD_SIZE);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn oversize_payload_fits_the_larger_limit() {
        let mut notification = Notification::new(6, mock_token());
        notification
            .set("filler", "x".repeat(MAX_PAYLOAD_SIZE))
            .expect("set");
        notification
            .to_bytes(crate::MAX_PAYLOAD_SIZE_IOS8)
            .expect("frame");
    }

    #[test]
    fn invalid_hex_token_is_rejected() {
        let mut notification = Notification::new(7, "not hex at all");
        notification.set_payload(&Payload::default()).expect("payload");
        let err = notification.to_bytes(MAX_PAYLOAD_SIZE).expect_err("token");
        assert!(matches!(err, EncodeError::BadTokenEncoding));
    }

    #[test]
    fn short_token_is_rejected() {
        // Valid hex, wrong length: eleven bytes instead of thirty-two.
        let mut notification = Notification::new(8, "af7685af756476543987af");
        notification.set_payload(&Payload::default()).expect("payload");
        let err = notification.to_bytes(MAX_PAYLOAD_SIZE).expect_err("token");
        assert!(matches!(err, EncodeError::BadTokenEncoding));
    }

    #[test]
    fn frame_round_trips() {
        let mut notification = Notification::new(0xCAFE, mock_token());
        notification.expiry = 1_700_000_123;
        notification.set_payload(&mock_payload()).expect("payload");
        notification.set("thread", "inbox").expect("set");

        let frame = notification.to_bytes(MAX_PAYLOAD_SIZE).expect("frame");
        let decoded = Notification::from_bytes(&frame).expect("decode");
        assert_eq!(decoded, notification);
    }

    #[test]
    fn decode_rejects_wrong_command() {
        let mut notification = Notification::new(1, mock_token());
        notification.set_payload(&Payload::default()).expect("payload");
        let mut frame = notification.to_bytes(MAX_PAYLOAD_SIZE).expect("frame").to_vec();
        frame[0] = 9;
        let err = Notification::from_bytes(&frame).expect_err("command");
        assert!(matches!(err, DecodeError::UnexpectedCommand(9)));
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        let mut notification = Notification::new(1, mock_token());
        notification.set_payload(&Payload::default()).expect("payload");
        let frame = notification.to_bytes(MAX_PAYLOAD_SIZE).expect("frame");
        let err = Notification::from_bytes(&frame[..frame.len() - 1]).expect_err("truncated");
        assert!(matches!(err, DecodeError::Incomplete));
    }
}

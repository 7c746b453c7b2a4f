// JSON model for the `aps` dictionary.
use serde::{Deserialize, Serialize};

/// The alert shown to the user: either a plain string or the localized
/// dictionary form. Apple recommends the string form whenever possible.
///
/// ```
/// use apns_wire::Alert;
///
/// let json = serde_json::to_string(&Alert::Text("hi".into())).expect("json");
/// assert_eq!(json, "\"hi\"");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alert {
    Text(String),
    Dict(AlertDictionary),
}

impl From<&str> for Alert {
    fn from(text: &str) -> Self {
        Alert::Text(text.to_string())
    }
}

/// Localized alert variant, serialized under the same `alert` key as the
/// plain-text form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertDictionary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(rename = "action-loc-key", skip_serializing_if = "Option::is_none")]
    pub action_loc_key: Option<String>,
    #[serde(rename = "loc-key", skip_serializing_if = "Option::is_none")]
    pub loc_key: Option<String>,
    #[serde(rename = "loc-args", skip_serializing_if = "Vec::is_empty", default)]
    pub loc_args: Vec<String>,
    #[serde(rename = "launch-image", skip_serializing_if = "Option::is_none")]
    pub launch_image: Option<String>,
}

/// The `aps` body a device receives. Unset fields are omitted from the JSON;
/// a badge of zero is meaningful (it clears the badge) and is serialized.
///
/// ```
/// use apns_wire::Payload;
///
/// let payload = Payload { badge: Some(0), ..Payload::default() };
/// let json = serde_json::to_string(&payload).expect("json");
/// assert_eq!(json, "{\"badge\":0}");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(rename = "content-available", skip_serializing_if = "Option::is_none")]
    pub content_available: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

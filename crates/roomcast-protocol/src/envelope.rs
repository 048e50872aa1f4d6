//! Relay envelope: the unit published on the shared broadcast subject.
//!
//! Wire shape (JSON):
//!
//! ```json
//! { "channel": "/chat/general", "data": "hello", "clientId": "…", "options": { "ignoreSelf": true } }
//! ```
//!
//! Any process that publishes and subscribes with this shape on the same
//! subject joins the same broadcast domain.

use serde::{Deserialize, Serialize};

/// Well-known subject every process subscribes to.
pub const BROADCAST_SUBJECT: &str = "websocket::broadcast";

/// Per-call delivery options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastOptions {
    /// Skip the session that originated the broadcast.
    #[serde(rename = "ignoreSelf", default, skip_serializing_if = "is_false")]
    pub ignore_self: bool,
}

impl BroadcastOptions {
    pub fn ignore_self() -> Self {
        Self { ignore_self: true }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A broadcast in flight between processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Target room key.
    pub channel: String,
    /// Payload, delivered verbatim as a text frame.
    pub data: String,
    /// Originating session id (used for self-exclusion).
    #[serde(rename = "clientId")]
    pub client_id: String,
    /// Missing or `null` options mean defaults.
    #[serde(default, deserialize_with = "options_or_default")]
    pub options: BroadcastOptions,
}

fn options_or_default<'de, D>(deserializer: D) -> Result<BroadcastOptions, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<BroadcastOptions>::deserialize(deserializer)?.unwrap_or_default())
}

impl Envelope {
    pub fn new(
        channel: impl Into<String>,
        data: impl Into<String>,
        client_id: impl Into<String>,
        options: BroadcastOptions,
    ) -> Self {
        Self {
            channel: channel.into(),
            data: data.into(),
            client_id: client_id.into(),
            options,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

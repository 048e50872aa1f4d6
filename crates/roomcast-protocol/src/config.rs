//! Upgrade subsystem configuration.
//!
//! Loaded once at boot. `middleware` names global middleware applied to every
//! upgrade route ahead of per-route middleware; `relay` switches on the
//! distributed broadcast mode.

use serde::{Deserialize, Serialize};

use crate::envelope::BROADCAST_SUBJECT;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsocketConfig {
    /// Named global middleware, in execution order.
    pub middleware: Vec<String>,
    /// Distributed relay settings. Accepts `redis` as an alias.
    #[serde(alias = "redis")]
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,
    /// Subject the broadcast envelopes are published on.
    pub subject: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://127.0.0.1:6379".into(),
            subject: BROADCAST_SUBJECT.into(),
        }
    }
}

impl WebsocketConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

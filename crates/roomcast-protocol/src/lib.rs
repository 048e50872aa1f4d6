//! Roomcast protocol types.
//!
//! Shared by every roomcast crate: the relay envelope, close codes, session
//! states, configuration, and the upgrade error taxonomy. Anything that
//! crosses a process boundary is defined here so that two processes built
//! from different versions still agree on the wire shape.

pub mod close;
pub mod config;
pub mod envelope;
pub mod error;

pub use close::{CloseCode, SessionState};
pub use config::{RelayConfig, WebsocketConfig};
pub use envelope::{BroadcastOptions, Envelope, BROADCAST_SUBJECT};
pub use error::UpgradeError;

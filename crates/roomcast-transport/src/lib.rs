//! Roomcast Transport Layer
//!
//! Binds the upgrade state machine to real sockets:
//! - Intercepts `Upgrade: websocket` requests in front of an axum router
//! - Answers rejected upgrades with their status and `Connection: close`
//! - Drives each opened session (one writer task, one reader loop)
//! - Orders shutdown: sessions first, then the listener, then the relay
//!
//! Plain HTTP requests pass through to the application's routes untouched.

pub mod server;
pub mod upgrade;

pub use server::{TransportConfig, TransportServer, build_app};
pub use upgrade::UpgradeLayer;

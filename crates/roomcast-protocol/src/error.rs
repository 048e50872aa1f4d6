//! Upgrade failure taxonomy.
//!
//! None of these escape the upgrade state machine; they decide how the
//! transport is terminated and what gets logged.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpgradeError {
    /// No registered pattern matches the request path.
    #[error("no upgrade route for {0}")]
    NoRoute(String),

    /// A middleware denied the request before the upgrade.
    #[error("rejected by middleware {middleware}: {reason}")]
    MiddlewareRejected {
        middleware: String,
        status: u16,
        reason: String,
    },

    /// The handler failed after the session was opened.
    #[error("handler fault: {0}")]
    HandlerFault(String),

    /// Relay configured but the shared channel is unreachable.
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),

    /// The server is draining and no longer accepts upgrades.
    #[error("server is shutting down")]
    ShuttingDown,

    /// The connection cap has been reached.
    #[error("connection limit reached ({0})")]
    ConnectionLimit(usize),
}

impl UpgradeError {
    pub fn middleware_rejected(
        middleware: impl Into<String>,
        status: u16,
        reason: impl Into<String>,
    ) -> Self {
        Self::MiddlewareRejected {
            middleware: middleware.into(),
            status,
            reason: reason.into(),
        }
    }

    /// HTTP status answered when the failure happens before the upgrade.
    pub fn status(&self) -> u16 {
        match self {
            Self::NoRoute(_) => 404,
            Self::MiddlewareRejected { status, .. } => *status,
            Self::HandlerFault(_) => 500,
            Self::RelayUnavailable(_) => 502,
            Self::ShuttingDown | Self::ConnectionLimit(_) => 503,
        }
    }
}

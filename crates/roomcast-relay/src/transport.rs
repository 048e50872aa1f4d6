//! Pub/sub transport seam for the relay.

use std::pin::Pin;

use futures_util::Stream;
use futures_util::future::BoxFuture;
use thiserror::Error;

/// Payloads received on a subscribed subject, in publish order.
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("envelope encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("relay transport unavailable: {0}")]
    Unavailable(String),
}

/// A shared publish/subscribe channel.
pub trait RelayTransport: Send + Sync + 'static {
    /// Publish on the publishing connection (opened on first use).
    fn publish<'a>(&'a self, subject: &'a str, payload: String) -> BoxFuture<'a, Result<(), RelayError>>;

    /// Open the subscribing connection and subscribe to `subject`. The
    /// subscription is active once this resolves.
    fn subscribe<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<MessageStream, RelayError>>;

    /// Release the publishing connection.
    fn close(&self) -> BoxFuture<'_, ()>;

    fn name(&self) -> &str;
}

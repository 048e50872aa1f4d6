//! Redis pub/sub transport.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::transport::{MessageStream, RelayError, RelayTransport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisTransport {
    client: redis::Client,
    /// Publishing connection; opened on first publish, dropped on error so
    /// the next publish reconnects. Commands on one multiplexed connection
    /// are sent in issue order.
    publisher: Mutex<Option<MultiplexedConnection>>,
}

impl RedisTransport {
    /// Validate the URL. No connection is made until first use.
    pub fn open(url: &str) -> Result<Self, RelayError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            publisher: Mutex::new(None),
        })
    }

    /// Shared publishing connection, connecting on first use. The lock is
    /// never held across network I/O.
    async fn publisher_connection(&self) -> Result<MultiplexedConnection, RelayError> {
        if let Some(conn) = self.publisher.lock().await.as_ref() {
            return Ok(conn.clone());
        }

        let conn = timeout(CONNECT_TIMEOUT, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| {
                RelayError::Unavailable(format!("connect timed out after {CONNECT_TIMEOUT:?}"))
            })??;

        let mut guard = self.publisher.lock().await;
        if guard.is_none() {
            info!("Relay publisher connected");
        }
        Ok(guard.get_or_insert(conn).clone())
    }
}

impl RelayTransport for RedisTransport {
    fn publish<'a>(&'a self, subject: &'a str, payload: String) -> BoxFuture<'a, Result<(), RelayError>> {
        Box::pin(async move {
            let mut conn = self.publisher_connection().await?;
            let result: redis::RedisResult<i64> = redis::cmd("PUBLISH")
                .arg(subject)
                .arg(payload)
                .query_async(&mut conn)
                .await;
            match result {
                Ok(receivers) => {
                    debug!("Relay publish on {subject} reached {receivers} subscriber(s)");
                    Ok(())
                }
                Err(e) => {
                    self.publisher.lock().await.take();
                    Err(e.into())
                }
            }
        })
    }

    fn subscribe<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<MessageStream, RelayError>> {
        Box::pin(async move {
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(subject).await?;
            info!("Relay subscriber listening on {subject}");

            let stream = pubsub
                .into_on_message()
                .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
            Ok(Box::pin(stream) as MessageStream)
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.publisher.lock().await.take().is_some() {
                info!("Relay publisher disconnected");
            }
        })
    }

    fn name(&self) -> &str {
        "redis"
    }
}

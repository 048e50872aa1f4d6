//! The relay itself: publisher for sessions, subscriber loop for the process.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use roomcast_protocol::{Envelope, RelayConfig, UpgradeError};
use roomcast_server::{BroadcastHub, RelayPublisher, RoomRegistry};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::redis_transport::RedisTransport;
use crate::transport::{RelayError, RelayTransport};

/// Upper bound on one publish before the hub falls back to local delivery.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

pub struct BroadcastRelay {
    transport: Arc<dyn RelayTransport>,
    subject: String,
    publish_timeout: Duration,
    subscriber: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastRelay {
    pub fn new(transport: Arc<dyn RelayTransport>, subject: impl Into<String>) -> Self {
        Self {
            transport,
            subject: subject.into(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            subscriber: Mutex::new(None),
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Build a Redis-backed relay, or `None` when the relay is disabled.
    pub fn from_config(config: &RelayConfig) -> Result<Option<Self>, RelayError> {
        if !config.enabled {
            return Ok(None);
        }
        let transport = RedisTransport::open(&config.url)?;
        Ok(Some(Self::new(Arc::new(transport), config.subject.clone())))
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_running(&self) -> bool {
        self.subscriber
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Subscribe, spawn the subscriber loop, and route the hub's broadcasts
    /// through this relay. The subscription is live when this returns.
    ///
    /// If the subscription ends on its own, the relay detaches itself and
    /// the hub goes back to local delivery.
    pub async fn start(self: &Arc<Self>, hub: &Arc<BroadcastHub>) -> Result<(), RelayError> {
        let mut messages = self.transport.subscribe(&self.subject).await?;
        let registry = hub.registry().clone();
        let subject = self.subject.clone();

        let publisher: Arc<dyn RelayPublisher> = self.clone();
        hub.attach_relay(publisher.clone());
        let weak_hub = Arc::downgrade(hub);
        let weak_publisher: Weak<dyn RelayPublisher> = Arc::downgrade(&publisher);
        drop(publisher);

        let task = tokio::spawn(async move {
            while let Some(payload) = messages.next().await {
                deliver_payload(&registry, &payload);
            }
            let detached = match (weak_hub.upgrade(), weak_publisher.upgrade()) {
                (Some(hub), Some(relay)) => hub.detach_relay_if(&relay),
                _ => false,
            };
            if detached {
                warn!("Relay subscription on {subject} ended, broadcasts fall back to local delivery");
            } else {
                warn!("Relay subscription on {subject} ended");
            }
        });

        if let Some(previous) = self.subscriber.lock().replace(task) {
            previous.abort();
        }
        info!(
            "Broadcast relay started ({} on {})",
            self.transport.name(),
            self.subject
        );
        Ok(())
    }

    /// Detach from the hub, stop the subscriber, release both connections.
    pub async fn shutdown(&self, hub: &BroadcastHub) {
        hub.detach_relay();
        let task = self.subscriber.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.transport.close().await;
        info!("Broadcast relay stopped");
    }
}

impl RelayPublisher for BroadcastRelay {
    fn publish<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), UpgradeError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = envelope
                .to_json()
                .map_err(|e| UpgradeError::RelayUnavailable(e.to_string()))?;
            match tokio::time::timeout(
                self.publish_timeout,
                self.transport.publish(&self.subject, payload),
            )
            .await
            {
                Ok(result) => result.map_err(|e| UpgradeError::RelayUnavailable(e.to_string())),
                Err(_) => Err(UpgradeError::RelayUnavailable(format!(
                    "publish timed out after {:?}",
                    self.publish_timeout
                ))),
            }
        })
    }
}

/// Decode one relay payload and deliver it to local room members.
/// Malformed payloads are logged and dropped. Returns deliveries made.
pub fn deliver_payload(registry: &RoomRegistry, payload: &str) -> usize {
    match Envelope::from_json(payload) {
        Ok(envelope) => {
            let delivered = registry.deliver(
                &envelope.channel,
                &envelope.data,
                &envelope.client_id,
                envelope.options,
            );
            debug!("Relay delivered to {delivered} member(s) of {}", envelope.channel);
            delivered
        }
        Err(e) => {
            warn!("Dropping malformed relay payload: {e}");
            0
        }
    }
}

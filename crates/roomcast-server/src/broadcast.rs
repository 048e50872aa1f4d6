//! Broadcast fan-out for a process.
//!
//! Without a relay, broadcasts go straight to [`RoomRegistry::deliver`].
//! With a relay attached, every broadcast is published and local members
//! receive it only when it comes back through the relay subscriber, so the
//! sender's own process uses the same path as every other process.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use roomcast_protocol::{BroadcastOptions, Envelope, UpgradeError};
use tracing::warn;

use crate::registry::RoomRegistry;

/// Publishing side of a relay, as seen by sessions.
pub trait RelayPublisher: Send + Sync {
    fn publish<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), UpgradeError>> + Send + 'a>>;
}

pub struct BroadcastHub {
    registry: Arc<RoomRegistry>,
    relay: RwLock<Option<Arc<dyn RelayPublisher>>>,
}

impl BroadcastHub {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            relay: RwLock::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn attach_relay(&self, relay: Arc<dyn RelayPublisher>) {
        *self.relay.write() = Some(relay);
    }

    pub fn detach_relay(&self) {
        self.relay.write().take();
    }

    /// Detach `relay` only if it is still the attached one. Returns whether
    /// it was detached.
    pub fn detach_relay_if(&self, relay: &Arc<dyn RelayPublisher>) -> bool {
        let mut attached = self.relay.write();
        let current = attached
            .as_ref()
            .is_some_and(|a| std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(relay)));
        if current {
            attached.take();
        }
        current
    }

    pub fn has_relay(&self) -> bool {
        self.relay.read().is_some()
    }

    pub async fn broadcast(
        &self,
        room_key: &str,
        data: String,
        sender_id: &str,
        options: BroadcastOptions,
    ) {
        let relay = self.relay.read().clone();
        let Some(relay) = relay else {
            self.registry.deliver(room_key, &data, sender_id, options);
            return;
        };

        let envelope = Envelope::new(room_key, data, sender_id, options);
        if let Err(e) = relay.publish(&envelope).await {
            warn!("Broadcast relay failed, delivering locally only: {e}");
            self.registry
                .deliver(room_key, &envelope.data, sender_id, options);
        }
    }
}

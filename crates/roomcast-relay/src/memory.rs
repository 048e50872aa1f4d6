//! In-process transport. Handles made with [`MemoryTransport::connect`] share
//! one bus, so several registries in one process behave like separate
//! server processes on a shared channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use futures_util::stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::transport::{MessageStream, RelayError, RelayTransport};

const BUS_CAPACITY: usize = 1024;

pub struct MemoryTransport {
    bus: broadcast::Sender<(String, String)>,
    available: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            bus,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Another handle on the same bus, with its own availability switch.
    pub fn connect(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the shared channel going away (publishes fail).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayTransport for MemoryTransport {
    fn publish<'a>(&'a self, subject: &'a str, payload: String) -> BoxFuture<'a, Result<(), RelayError>> {
        Box::pin(async move {
            if !self.available.load(Ordering::Acquire) {
                return Err(RelayError::Unavailable("memory bus offline".into()));
            }
            // No subscribers anywhere is not an error.
            let _ = self.bus.send((subject.to_string(), payload));
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<MessageStream, RelayError>> {
        let rx = self.bus.subscribe();
        let subject = subject.to_string();
        Box::pin(async move {
            let stream = stream::unfold((rx, subject), |(mut rx, subject)| async move {
                loop {
                    match rx.recv().await {
                        Ok((s, payload)) if s == subject => return Some((payload, (rx, subject))),
                        Ok(_) => continue,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Memory relay subscriber lagged, dropped {n} message(s)");
                            continue;
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            });
            Ok(Box::pin(stream) as MessageStream)
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn name(&self) -> &str {
        "memory"
    }
}

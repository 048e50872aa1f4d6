//! Broadcast relay: one logical broadcast domain across processes.
//!
//! Every process publishes its broadcasts to a shared subject and runs one
//! subscriber task that re-delivers every envelope (its own included) to
//! local room members. Two connections are used: the subscriber spends its
//! life blocked receiving, so publishing always goes through a separate one.

pub mod memory;
pub mod redis_transport;
pub mod relay;
pub mod transport;

pub use memory::MemoryTransport;
pub use relay::{deliver_payload, BroadcastRelay, DEFAULT_PUBLISH_TIMEOUT};
pub use transport::{MessageStream, RelayError, RelayTransport};
pub use redis_transport::RedisTransport;

//! Roomcast: WebSocket upgrade routing and room broadcast.
//!
//! The library half of the binary. It holds the built-in routes,
//! middleware, and controllers so they can be exercised without a process.

pub mod app;

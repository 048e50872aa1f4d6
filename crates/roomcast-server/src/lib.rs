//! Roomcast server core: upgrade routing, sessions, and rooms.
//!
//! Owns the upgrade route table, the middleware chain, the room registry,
//! and the transport-independent half of the upgrade state machine. The
//! transport crate drives sockets through [`Upgrader`]; the relay crate
//! plugs into [`BroadcastHub`] via [`RelayPublisher`].

pub mod broadcast;
pub mod context;
pub mod handler;
pub mod middleware;
pub mod pattern;
pub mod registry;
pub mod router;
pub mod session;
pub mod upgrade;

pub use broadcast::{BroadcastHub, RelayPublisher};
pub use context::{Frame, Inbound, RequestContext, SessionContext};
pub use handler::{Controller, ControllerRegistry, Handler, HandlerError, HandlerFuture, HandlerResult};
pub use middleware::{FnMiddleware, Middleware, MiddlewareChain, MiddlewareRef, MiddlewareRegistry, MiddlewareResult};
pub use pattern::{RouteParams, RoutePattern};
pub use registry::{RegistryStats, RoomRegistry};
pub use router::{CommittedRouter, RouteEntry, RouteMatch, RouterError, UpgradeRouter};
pub use session::{Outbound, Session, SessionError, SessionHandle};
pub use upgrade::{OpenedSession, PreparedUpgrade, Upgrader, SHUTDOWN_REASON};

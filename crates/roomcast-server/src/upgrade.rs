//! Upgrade state machine, minus the socket.
//!
//! `RECEIVED → MATCHED → MIDDLEWARE_RUNNING` happens in [`Upgrader::prepare`],
//! before the protocol handshake. After the transport has performed the
//! handshake it calls [`Upgrader::open`] (`UPGRADING → OPEN`), which creates
//! the session, joins its room, and starts the handler. `CLOSED` is reached
//! through [`Session::close`] / [`Session::terminate`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::FutureExt;
use roomcast_protocol::{CloseCode, UpgradeError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::broadcast::BroadcastHub;
use crate::context::{Frame, Inbound, RequestContext, SessionContext};
use crate::handler::{ControllerRegistry, Handler, HandlerError};
use crate::registry::RoomRegistry;
use crate::router::{CommittedRouter, RouteEntry};
use crate::session::{Outbound, Session, SessionHandle};

/// Close reason sent to every session on shutdown.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// A request that matched and passed its middleware.
#[derive(Debug)]
pub struct PreparedUpgrade {
    route: Arc<RouteEntry>,
    context: RequestContext,
}

impl PreparedUpgrade {
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn pattern(&self) -> &str {
        self.route.pattern.as_str()
    }
}

/// The pieces the transport needs to drive an opened session.
pub struct OpenedSession {
    pub session: SessionHandle,
    /// Drained by the writer task.
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    /// Fed by the reader loop.
    pub inbound: mpsc::UnboundedSender<Frame>,
    pub handler: JoinHandle<()>,
}

pub struct Upgrader {
    router: Arc<CommittedRouter>,
    controllers: Arc<ControllerRegistry>,
    hub: Arc<BroadcastHub>,
    accepting: AtomicBool,
    max_sessions: Option<usize>,
}

impl Upgrader {
    pub fn new(
        router: CommittedRouter,
        controllers: Arc<ControllerRegistry>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            router: Arc::new(router),
            controllers,
            hub,
            accepting: AtomicBool::new(true),
            max_sessions: None,
        }
    }

    pub fn with_max_sessions(mut self, max: Option<usize>) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn router(&self) -> &CommittedRouter {
        &self.router
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.hub.registry()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Match the request and run its middleware chain.
    pub async fn prepare(&self, mut ctx: RequestContext) -> Result<PreparedUpgrade, UpgradeError> {
        if !self.is_accepting() {
            return Err(UpgradeError::ShuttingDown);
        }
        if let Some(max) = self.max_sessions {
            if self.registry().len() >= max {
                return Err(UpgradeError::ConnectionLimit(max));
            }
        }

        let matched = self
            .router
            .match_path(&ctx.path)
            .ok_or_else(|| UpgradeError::NoRoute(ctx.path.clone()))?;
        debug!("Upgrade matched {} -> {}", ctx.path, matched.route.pattern.as_str());

        ctx.params = matched.params;
        matched.route.middleware.run(&mut ctx).await?;

        Ok(PreparedUpgrade {
            route: matched.route,
            context: ctx,
        })
    }

    /// Create and open the session for a completed handshake, then start the
    /// handler in its own task. Returns `None` when shutdown began meanwhile.
    pub fn open(&self, prepared: PreparedUpgrade) -> Option<OpenedSession> {
        if !self.is_accepting() {
            return None;
        }

        let id = uuid::Uuid::new_v4().to_string();
        let PreparedUpgrade { route, context } = prepared;
        let (session, outbound) = Session::new(id, context.path.clone(), self.hub.clone());
        if !session.open() {
            return None;
        }
        // Shutdown may have snapshotted the registry before this join.
        if !self.is_accepting() {
            session.close(CloseCode::Normal, SHUTDOWN_REASON);
            return None;
        }
        info!("Session opened: {} on {}", session.id(), session.room_key());

        let (inbound, messages) = Inbound::channel();
        let ctx = SessionContext {
            params: context.params.clone(),
            request: context,
            ws: session.clone(),
            messages,
        };
        let handler = tokio::spawn(run_handler(
            route.handler.clone(),
            self.controllers.clone(),
            ctx,
        ));

        Some(OpenedSession {
            session,
            outbound,
            inbound,
            handler,
        })
    }

    /// Stop accepting upgrades and close every open session.
    pub fn shutdown(&self) -> usize {
        self.accepting.store(false, Ordering::Release);
        let closed = self.registry().close_all(CloseCode::Normal, SHUTDOWN_REASON);
        info!("Closed {closed} session(s) for shutdown");
        closed
    }
}

/// Run a handler; any error or panic closes the session with its message.
async fn run_handler(handler: Handler, controllers: Arc<ControllerRegistry>, ctx: SessionContext) {
    let session = ctx.ws.clone();
    let outcome = match handler.resolve(&controllers) {
        Ok(resolved) => AssertUnwindSafe(async move { resolved.invoke(ctx).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::failed(panic_message(panic.as_ref())))),
        Err(e) => Err(e),
    };

    if let Err(e) = outcome {
        error!("Handler fault on session {}: {e}", session.id());
        session.close(CloseCode::Normal, e.to_string());
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

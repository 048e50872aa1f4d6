//! Built-in upgrade routes, middleware, and controllers served by the binary.
//!
//! - `/chat/:room`: every text frame is broadcast to the room (sender included)
//! - `/chat/:room/quiet`: a separate room keyed by its own path (it does not
//!   share members with `/chat/:room`); the sender does not get its own frames
//! - `/echo/:tag?`: `EchoController::handle` echoes frames back to the sender
//!
//! Named middleware: `token` (checks `?token=` against a shared secret) and
//! `access-log`.

use std::sync::Arc;

use roomcast_protocol::BroadcastOptions;
use roomcast_server::{
    Controller, ControllerRegistry, FnMiddleware, Frame, Handler, HandlerError, HandlerFuture,
    HandlerResult, Middleware, MiddlewareRef, MiddlewareRegistry, MiddlewareResult,
    RequestContext, RouterError, SessionContext, UpgradeRouter,
};
use tracing::{debug, info};

/// Register the built-in upgrade routes.
pub fn routes() -> Result<UpgradeRouter, RouterError> {
    let mut router = UpgradeRouter::new();
    router
        .register("/chat/:room/quiet", Handler::function(quiet_chat), vec![])?
        .register("/chat/:room", Handler::function(chat), vec![])?
        .register(
            "/echo/:tag?",
            Handler::method("EchoController", None),
            vec![MiddlewareRef::named("access-log")],
        )?;
    Ok(router)
}

/// Named middleware available to routes and to the global list.
pub fn middleware(token: Option<String>) -> MiddlewareRegistry {
    let registry = MiddlewareRegistry::new();
    registry.register("token", TokenMiddleware { token });
    registry.register(
        "access-log",
        FnMiddleware::new("access-log", |ctx: &mut RequestContext| {
            info!(
                "Upgrade request {} from {}",
                ctx.path,
                ctx.remote_addr
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|| "unknown".into())
            );
            MiddlewareResult::allow()
        }),
    );
    registry
}

pub fn controllers() -> ControllerRegistry {
    let controllers = ControllerRegistry::new();
    controllers.bind("EchoController", || EchoController);
    controllers
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn chat(ctx: SessionContext) -> HandlerResult {
    relay_frames(ctx, BroadcastOptions::default()).await
}

async fn quiet_chat(ctx: SessionContext) -> HandlerResult {
    relay_frames(ctx, BroadcastOptions::ignore_self()).await
}

async fn relay_frames(ctx: SessionContext, options: BroadcastOptions) -> HandlerResult {
    let SessionContext {
        ws, mut messages, ..
    } = ctx;
    while let Some(frame) = messages.recv().await {
        match frame.as_text() {
            Some(text) => ws.broadcast(text, options).await,
            None => debug!("Ignoring binary frame on {}", ws.room_key()),
        }
    }
    Ok(())
}

/// Echoes every frame back to the session that sent it.
pub struct EchoController;

impl Controller for EchoController {
    fn handles(&self, method: &str) -> bool {
        method == "handle"
    }

    fn call(self: Arc<Self>, _method: &str, ctx: SessionContext) -> HandlerFuture {
        Box::pin(async move {
            let SessionContext {
                ws,
                params,
                mut messages,
                ..
            } = ctx;
            let prefix = params
                .get("tag")
                .map(|tag| format!("[{tag}] "))
                .unwrap_or_default();
            while let Some(frame) = messages.recv().await {
                let reply = match frame {
                    Frame::Text(text) => Frame::Text(format!("{prefix}{text}")),
                    binary => binary,
                };
                ws.send(reply)?;
            }
            Ok::<(), HandlerError>(())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Requires `?token=<secret>` when a secret is configured.
pub struct TokenMiddleware {
    token: Option<String>,
}

impl Middleware for TokenMiddleware {
    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareResult {
        let Some(expected) = self.token.as_deref() else {
            return MiddlewareResult::allow();
        };
        match ctx.query_param("token") {
            Some(given) if given == expected => MiddlewareResult::allow(),
            Some(_) => MiddlewareResult::block("invalid token"),
            None => MiddlewareResult::reject(401, "token required"),
        }
    }

    fn name(&self) -> &str {
        "token"
    }
}

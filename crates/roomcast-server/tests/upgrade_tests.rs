//! Upgrade state machine tests: match, middleware, open, handler faults.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use roomcast_protocol::{BroadcastOptions, SessionState, UpgradeError};
use roomcast_server::*;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

struct Fixture {
    upgrader: Upgrader,
    calls: Arc<AtomicUsize>,
}

async fn fail(_ctx: SessionContext) -> HandlerResult {
    Err(HandlerError::failed("boom"))
}

async fn explode(_ctx: SessionContext) -> HandlerResult {
    panic!("handler exploded")
}

fn ctx(target: &str) -> RequestContext {
    RequestContext::from_target(target, Default::default())
}

/// Router with `/chat/:room` (echo handler) guarded by `middleware`.
fn fixture(middleware: Vec<MiddlewareRef>) -> Fixture {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut router = UpgradeRouter::new();
    router
        .register(
            "/chat/:room",
            Handler::function(move |ctx: SessionContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    let room = ctx.params.get("room").unwrap_or_default().to_string();
                    ctx.ws.send(format!("joined {room}"))?;
                    let SessionContext { ws, mut messages, .. } = ctx;
                    tokio::spawn(async move {
                        while let Some(frame) = messages.recv().await {
                            if let Some(text) = frame.as_text() {
                                ws.broadcast(text, BroadcastOptions::default()).await;
                            }
                        }
                    });
                    Ok::<(), HandlerError>(())
                }
            }),
            middleware,
        )
        .unwrap();
    router
        .register(
            "/fail",
            Handler::function(fail),
            vec![],
        )
        .unwrap();
    router
        .register(
            "/panic",
            Handler::function(explode),
            vec![],
        )
        .unwrap();
    router
        .register("/ghost", Handler::method("Missing", None), vec![])
        .unwrap();

    let router = router.commit(&[], &MiddlewareRegistry::new()).unwrap();
    let hub = Arc::new(BroadcastHub::new(Arc::new(RoomRegistry::new())));
    Fixture {
        upgrader: Upgrader::new(router, Arc::new(ControllerRegistry::new()), hub),
        calls,
    }
}

async fn next_text(rx: &mut UnboundedReceiver<Outbound>) -> Option<String> {
    match timeout(Duration::from_secs(2), rx.recv()).await.ok()?? {
        Outbound::Frame(Frame::Text(text)) => Some(text),
        _ => None,
    }
}

async fn next_close(rx: &mut UnboundedReceiver<Outbound>) -> (u16, String) {
    loop {
        match timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap() {
            Outbound::Close { code, reason } => return (code, reason),
            _ => continue,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_scenario_both_members_receive_broadcast() {
    let f = fixture(vec![]);

    let prepared = f.upgrader.prepare(ctx("/chat/general?x=1")).await.unwrap();
    assert_eq!(prepared.context().params.get("room"), Some("general"));
    assert_eq!(prepared.context().query.as_deref(), Some("x=1"));
    let mut a = f.upgrader.open(prepared).unwrap();

    let prepared = f.upgrader.prepare(ctx("/chat/general")).await.unwrap();
    let mut b = f.upgrader.open(prepared).unwrap();

    assert_eq!(a.session.room_key(), "/chat/general");
    assert_ne!(a.session.id(), b.session.id());
    assert_eq!(next_text(&mut a.outbound).await.unwrap(), "joined general");
    assert_eq!(next_text(&mut b.outbound).await.unwrap(), "joined general");

    a.session.broadcast("hello", BroadcastOptions::default()).await;
    assert_eq!(next_text(&mut a.outbound).await.unwrap(), "hello");
    assert_eq!(next_text(&mut b.outbound).await.unwrap(), "hello");

    // Inbound frames reach the handler's message loop.
    b.inbound.send(Frame::Text("from b".into())).unwrap();
    assert_eq!(next_text(&mut a.outbound).await.unwrap(), "from b");
    assert_eq!(f.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unknown_path_is_rejected_without_handler() {
    let f = fixture(vec![]);
    let err = f.upgrader.prepare(ctx("/unknown")).await.unwrap_err();
    assert_eq!(err, UpgradeError::NoRoute("/unknown".into()));
    assert_eq!(err.status(), 404);
    assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    assert!(f.upgrader.registry().is_empty());
}

#[tokio::test]
async fn panicking_middleware_rejects_and_registry_is_unchanged() {
    let f = fixture(vec![MiddlewareRef::inline(FnMiddleware::new("explode", |_| {
        panic!("middleware failure")
    }))]);
    let err = f.upgrader.prepare(ctx("/chat/general")).await.unwrap_err();
    assert!(matches!(err, UpgradeError::MiddlewareRejected { ref middleware, status: 500, .. } if middleware == "explode"));
    assert!(f.upgrader.registry().is_empty());
    assert_eq!(f.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blocking_middleware_short_circuits_the_chain() {
    let reached = Arc::new(AtomicUsize::new(0));
    let seen = reached.clone();
    let f = fixture(vec![
        MiddlewareRef::inline(FnMiddleware::new("auth", |ctx| {
            if ctx.query_param("token") == Some("secret") {
                ctx.set("user", json!({"name": "ada"}));
                MiddlewareResult::allow()
            } else {
                MiddlewareResult::reject(401, "missing token")
            }
        })),
        MiddlewareRef::inline(FnMiddleware::new("after", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            MiddlewareResult::allow()
        })),
    ]);

    let err = f.upgrader.prepare(ctx("/chat/a")).await.unwrap_err();
    assert_eq!(err, UpgradeError::middleware_rejected("auth", 401, "missing token"));
    assert_eq!(reached.load(Ordering::SeqCst), 0);

    let prepared = f.upgrader.prepare(ctx("/chat/a?token=secret")).await.unwrap();
    assert_eq!(prepared.context().get("user"), Some(&json!({"name": "ada"})));
    assert_eq!(reached.load(Ordering::SeqCst), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler faults
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn handler_error_closes_session_with_reason() {
    let f = fixture(vec![]);
    let prepared = f.upgrader.prepare(ctx("/fail")).await.unwrap();
    let mut opened = f.upgrader.open(prepared).unwrap();

    assert_eq!(next_close(&mut opened.outbound).await, (1000, "boom".into()));
    opened.handler.await.unwrap();
    assert_eq!(opened.session.state(), SessionState::Closed);
    assert!(f.upgrader.registry().is_empty());
}

#[tokio::test]
async fn handler_panic_is_contained() {
    let f = fixture(vec![]);
    let prepared = f.upgrader.prepare(ctx("/panic")).await.unwrap();
    let mut opened = f.upgrader.open(prepared).unwrap();

    assert_eq!(next_close(&mut opened.outbound).await, (1000, "handler exploded".into()));
    assert!(opened.handler.await.is_ok());
    assert!(f.upgrader.registry().is_empty());
}

#[tokio::test]
async fn unbound_controller_closes_session() {
    let f = fixture(vec![]);
    let prepared = f.upgrader.prepare(ctx("/ghost")).await.unwrap();
    let mut opened = f.upgrader.open(prepared).unwrap();

    let (code, reason) = next_close(&mut opened.outbound).await;
    assert_eq!(code, 1000);
    assert!(reason.contains("Missing"));
}

#[tokio::test]
async fn handler_return_keeps_session_open() {
    let f = fixture(vec![]);
    let prepared = f.upgrader.prepare(ctx("/chat/x")).await.unwrap();
    let opened = f.upgrader.open(prepared).unwrap();
    opened.handler.await.unwrap();
    assert!(opened.session.is_ready());
    assert!(f.upgrader.registry().contains("/chat/x", opened.session.id()));
}

// ─────────────────────────────────────────────────────────────────────────────
// Controllers
// ─────────────────────────────────────────────────────────────────────────────

struct GreetController;

impl Controller for GreetController {
    fn handles(&self, method: &str) -> bool {
        matches!(method, "handle" | "shout")
    }

    fn call(self: Arc<Self>, method: &str, ctx: SessionContext) -> HandlerFuture {
        let text = if method == "shout" { "HELLO" } else { "hello" };
        Box::pin(async move {
            ctx.ws.send(text)?;
            Ok::<(), HandlerError>(())
        })
    }
}

#[tokio::test]
async fn controller_methods_are_resolved_per_session() {
    let made = Arc::new(AtomicUsize::new(0));
    let counter = made.clone();
    let controllers = ControllerRegistry::new();
    controllers.bind("Greet", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        GreetController
    });

    let mut router = UpgradeRouter::new();
    router.register("/greet", Handler::method("Greet", None), vec![]).unwrap();
    router.register("/shout", Handler::method("Greet", Some("shout")), vec![]).unwrap();
    router.register("/nope", Handler::method("Greet", Some("missing")), vec![]).unwrap();
    let router = router.commit(&[], &MiddlewareRegistry::new()).unwrap();
    let hub = Arc::new(BroadcastHub::new(Arc::new(RoomRegistry::new())));
    let upgrader = Upgrader::new(router, Arc::new(controllers), hub);

    let mut greet = upgrader.open(upgrader.prepare(ctx("/greet")).await.unwrap()).unwrap();
    let mut shout = upgrader.open(upgrader.prepare(ctx("/shout")).await.unwrap()).unwrap();
    assert_eq!(next_text(&mut greet.outbound).await.unwrap(), "hello");
    assert_eq!(next_text(&mut shout.outbound).await.unwrap(), "HELLO");
    assert_eq!(made.load(Ordering::SeqCst), 2);

    let mut nope = upgrader.open(upgrader.prepare(ctx("/nope")).await.unwrap()).unwrap();
    let (_, reason) = next_close(&mut nope.outbound).await;
    assert!(reason.contains("missing"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Limits and shutdown
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn connection_limit_rejects_extra_upgrades() {
    let f = fixture(vec![]);
    let upgrader = f.upgrader.with_max_sessions(Some(1));
    let _first = upgrader.open(upgrader.prepare(ctx("/chat/a")).await.unwrap()).unwrap();
    let err = upgrader.prepare(ctx("/chat/a")).await.unwrap_err();
    assert_eq!(err, UpgradeError::ConnectionLimit(1));
}

#[tokio::test]
async fn shutdown_closes_sessions_and_refuses_new_upgrades() {
    let f = fixture(vec![]);
    let prepared = f.upgrader.prepare(ctx("/chat/a")).await.unwrap();
    let mut opened = f.upgrader.open(prepared).unwrap();
    let late = f.upgrader.prepare(ctx("/chat/a")).await.unwrap();

    assert_eq!(f.upgrader.shutdown(), 1);
    assert_eq!(next_close(&mut opened.outbound).await, (1000, SHUTDOWN_REASON.into()));
    assert!(f.upgrader.registry().is_empty());

    // Handshake finished after shutdown began: no session.
    assert!(f.upgrader.open(late).is_none());
    assert_eq!(
        f.upgrader.prepare(ctx("/chat/a")).await.unwrap_err(),
        UpgradeError::ShuttingDown
    );
}

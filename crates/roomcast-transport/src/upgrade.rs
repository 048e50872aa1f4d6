//! Upgrade interception and the per-session socket driver.
//!
//! The interceptor sits in front of the application's axum routes. Requests
//! carrying `Upgrade: websocket` are matched and vetted by the [`Upgrader`]
//! before the handshake; everything else is passed through.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        ConnectInfo, FromRequestParts, Request, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use roomcast_protocol::{CloseCode, UpgradeError};
use roomcast_server::{
    Frame, OpenedSession, Outbound, PreparedUpgrade, RequestContext, SHUTDOWN_REASON, SessionHandle,
    Upgrader,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long a closing session gets to flush its close frame.
const CLOSE_FLUSH: Duration = Duration::from_secs(2);

/// Installs upgrade interception on an axum router.
#[derive(Clone)]
pub struct UpgradeLayer {
    upgrader: Arc<Upgrader>,
}

impl UpgradeLayer {
    pub fn new(upgrader: Arc<Upgrader>) -> Self {
        Self { upgrader }
    }

    /// Wrap every route and the fallback of `router`. Routes added to the
    /// returned router afterwards are not intercepted.
    pub fn apply<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self.upgrader.clone(), intercept))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interception
// ─────────────────────────────────────────────────────────────────────────────

async fn intercept(State(upgrader): State<Arc<Upgrader>>, request: Request, next: Next) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    let (mut parts, _body) = request.into_parts();
    let mut ctx = RequestContext::new(
        parts.uri.path(),
        parts.uri.query().map(str::to_string),
        parts.headers.clone(),
    );
    ctx.remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let prepared = match upgrader.prepare(ctx).await {
        Ok(prepared) => prepared,
        Err(e) => return reject(e),
    };

    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!("Malformed upgrade request for {}: {rejection}", parts.uri.path());
            return rejection.into_response();
        }
    };

    ws.on_failed_upgrade(|e| warn!("WebSocket handshake failed: {e}"))
        .on_upgrade(move |socket| drive_session(socket, upgrader, prepared))
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Refuse the upgrade: the error's status, its message, and `Connection: close`.
fn reject(error: UpgradeError) -> Response {
    match &error {
        UpgradeError::NoRoute(path) => debug!("No upgrade route for {path}"),
        other => warn!("Upgrade rejected: {other}"),
    }
    let status = StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONNECTION, "close")], error.to_string()).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Session driver
// ─────────────────────────────────────────────────────────────────────────────

async fn drive_session(mut socket: WebSocket, upgrader: Arc<Upgrader>, prepared: PreparedUpgrade) {
    let Some(opened) = upgrader.open(prepared) else {
        // Shutdown began while the handshake was in flight.
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal.code(),
                reason: SHUTDOWN_REASON.into(),
            })))
            .await;
        return;
    };

    let OpenedSession {
        session,
        outbound,
        inbound,
        ..
    } = opened;
    let session_id = session.id().to_string();
    info!(
        "Client connected: {session_id} (total: {})",
        upgrader.registry().len()
    );

    let (ws_tx, ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(session.clone(), ws_tx, outbound));

    read_loop(&session, ws_rx, inbound).await;
    session.terminate();

    if tokio::time::timeout(CLOSE_FLUSH, &mut writer).await.is_err() {
        warn!("Writer for {session_id} did not finish in time");
        writer.abort();
    }

    info!(
        "Client disconnected: {session_id} (total: {})",
        upgrader.registry().len()
    );
}

/// Forward peer frames to the handler until either side closes.
async fn read_loop(
    session: &SessionHandle,
    mut ws_rx: SplitStream<WebSocket>,
    inbound: mpsc::UnboundedSender<Frame>,
) {
    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = inbound.send(Frame::Text(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let _ = inbound.send(Frame::Binary(bytes.to_vec()));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        session.pong(data.to_vec());
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        debug!(
                            "Peer closed {} ({:?})",
                            session.id(),
                            frame.map(|f| f.code)
                        );
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {e}", session.id());
                        break;
                    }
                    None => break,
                }
            }
            _ = session.closed() => break,
        }
    }
}

/// Drain the session's outbound queue into the socket. Once the session is
/// closed, flush what is still queued (the close frame included) and close.
async fn write_loop(
    session: SessionHandle,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    loop {
        tokio::select! {
            biased;
            out = outbound.recv() => {
                let Some(out) = out else { break };
                if !write_one(&mut ws_tx, out).await {
                    break;
                }
            }
            _ = session.closed() => {
                while let Ok(out) = outbound.try_recv() {
                    if !write_one(&mut ws_tx, out).await {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = ws_tx.close().await;
}

/// Returns false when writing must stop (socket error or close frame sent).
async fn write_one(ws_tx: &mut SplitSink<WebSocket, Message>, out: Outbound) -> bool {
    let (message, last) = match out {
        Outbound::Frame(Frame::Text(text)) => (Message::Text(text.into()), false),
        Outbound::Frame(Frame::Binary(bytes)) => (Message::Binary(bytes.into()), false),
        Outbound::Pong(data) => (Message::Pong(data.into()), false),
        Outbound::Close { code, reason } => (
            Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
            true,
        ),
    };
    match ws_tx.send(message).await {
        Ok(()) => !last,
        Err(e) => {
            debug!("Socket write failed: {e}");
            false
        }
    }
}

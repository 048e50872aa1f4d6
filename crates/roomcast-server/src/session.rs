//! A single upgraded connection.
//!
//! The session owns the outbound half of its transport through an unbounded
//! channel drained by one writer task; the transport layer owns the socket
//! and the reader loop. State transitions are atomic so a close coming from
//! the peer and one coming from the application can race safely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use roomcast_protocol::{BroadcastOptions, CloseCode, SessionState};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::broadcast::BroadcastHub;
use crate::context::Frame;

/// Longest close reason a close frame can carry.
const MAX_CLOSE_REASON: usize = 123;

pub type SessionHandle = Arc<Session>;

/// Instructions for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Pong(Vec<u8>),
    /// Send a close frame, then stop writing.
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} is not open")]
    Closed(String),
}

pub struct Session {
    id: String,
    room_key: String,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed_tx: watch::Sender<bool>,
    hub: Arc<BroadcastHub>,
}

impl Session {
    /// Create a session in `Connecting`. The receiver feeds the writer task.
    pub fn new(
        id: impl Into<String>,
        room_key: impl Into<String>,
        hub: Arc<BroadcastHub>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        let session = Arc::new(Self {
            id: id.into(),
            room_key: room_key.into(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            outbound,
            closed_tx,
            hub,
        });
        (session, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn room_key(&self) -> &str {
        &self.room_key
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Readiness flag: true while the session is open.
    pub fn is_ready(&self) -> bool {
        self.state().is_open()
    }

    /// `Connecting → Open`, then join the room. Returns false if the session
    /// was closed before it could open.
    pub fn open(self: &Arc<Self>) -> bool {
        if !self.transition(SessionState::Connecting, SessionState::Open) {
            return false;
        }
        self.hub
            .registry()
            .join(&self.room_key, &self.id, self.clone());
        // A close may have landed between the transition and the join.
        if !self.is_ready() {
            self.hub.registry().leave(&self.room_key, &self.id);
            return false;
        }
        true
    }

    /// Queue a frame for this session.
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), SessionError> {
        if !self.is_ready() {
            return Err(SessionError::Closed(self.id.clone()));
        }
        self.outbound
            .send(Outbound::Frame(frame.into()))
            .map_err(|_| SessionError::Closed(self.id.clone()))
    }

    pub fn pong(&self, payload: Vec<u8>) {
        let _ = self.outbound.send(Outbound::Pong(payload));
    }

    /// Application-level close: leave the room, send a close frame, end the
    /// transport. Idempotent; returns true only for the call that closed it.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) -> bool {
        let previous = self.begin_close();
        if !matches!(previous, SessionState::Connecting | SessionState::Open) {
            return false;
        }
        self.hub.registry().leave(&self.room_key, &self.id);

        let mut reason = reason.into();
        truncate_at_char_boundary(&mut reason, MAX_CLOSE_REASON);
        let _ = self.outbound.send(Outbound::Close {
            code: code.code(),
            reason,
        });
        self.finish_close();
        debug!("Session closed by server: {} ({})", self.id, code.code());
        true
    }

    /// Transport-level close (peer closed, socket error). Idempotent.
    pub fn terminate(&self) -> bool {
        let previous = self.begin_close();
        if !matches!(previous, SessionState::Connecting | SessionState::Open) {
            return false;
        }
        self.hub.registry().leave(&self.room_key, &self.id);
        self.finish_close();
        true
    }

    /// Broadcast to the session's room, through the relay when one is
    /// attached. Never fails: relay faults fall back to local delivery.
    pub async fn broadcast(&self, data: impl Into<String>, options: BroadcastOptions) {
        self.hub
            .broadcast(&self.room_key, data.into(), &self.id, options)
            .await;
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `Closing` from `Connecting`/`Open`; returns the prior state.
    fn begin_close(&self) -> SessionState {
        loop {
            let current = self.state();
            if !matches!(current, SessionState::Connecting | SessionState::Open) {
                return current;
            }
            if self.transition(current, SessionState::Closing) {
                return current;
            }
        }
    }

    fn finish_close(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
        self.closed_tx.send_replace(true);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("room_key", &self.room_key)
            .field("state", &self.state())
            .finish()
    }
}

fn truncate_at_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

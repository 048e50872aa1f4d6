//! Request and session contexts.
//!
//! A [`RequestContext`] is built per upgrade request and threaded through the
//! middleware chain, which may enrich it (e.g. attach an authenticated user).
//! Once the upgrade succeeds a fresh [`SessionContext`] is constructed from it
//! and handed to the route handler.

use std::collections::HashMap;
use std::net::SocketAddr;

use http::HeaderMap;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::pattern::RouteParams;
use crate::session::SessionHandle;

/// Context for a single upgrade request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request path with the query string stripped.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Request headers, passed through untouched.
    pub headers: HeaderMap,
    /// Parameters extracted by the matched pattern.
    pub params: RouteParams,
    /// Peer address when the transport knows it.
    pub remote_addr: Option<SocketAddr>,
    /// Values attached by middleware.
    extensions: HashMap<String, Value>,
}

impl RequestContext {
    pub fn new(path: impl Into<String>, query: Option<String>, headers: HeaderMap) -> Self {
        Self {
            path: path.into(),
            query,
            headers,
            ..Default::default()
        }
    }

    /// Split a request target (`/path?query`) into path and query.
    pub fn from_target(target: &str, headers: HeaderMap) -> Self {
        match target.split_once('?') {
            Some((path, query)) => Self::new(path, Some(query.to_string()), headers),
            None => Self::new(target, None, headers),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of a query parameter. No percent-decoding.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then_some(value)
        })
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.extensions.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }
}

/// A text or binary message frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Inbound frames for one session, in arrival order.
///
/// The handler may consume it directly, move it into its own task, or drop
/// it; the session stays open either way and is closed only by the peer,
/// the application, or shutdown.
#[derive(Debug)]
pub struct Inbound {
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Inbound {
    pub fn channel() -> (mpsc::UnboundedSender<Frame>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Next frame, or `None` once the session is closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

/// Everything a route handler gets for a freshly opened session.
#[derive(Debug)]
pub struct SessionContext {
    /// The (middleware-enriched) upgrade request.
    pub request: RequestContext,
    /// The session itself.
    pub ws: SessionHandle,
    /// Matched route parameters.
    pub params: RouteParams,
    /// Inbound messages.
    pub messages: Inbound,
}

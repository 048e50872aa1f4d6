//! Upgrade Router: the route table for upgrade requests.
//!
//! Separate from the HTTP route table. Routes are registered during boot on
//! an [`UpgradeRouter`]; `commit` consumes it and produces the read-only
//! [`CommittedRouter`] that the transport consults on every upgrade.
//!
//! Overlapping patterns: the first registered pattern that matches wins.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::handler::Handler;
use crate::middleware::{MiddlewareChain, MiddlewareRef, MiddlewareRegistry};
use crate::pattern::{RouteParams, RoutePattern};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("unknown middleware {middleware:?} on route {pattern:?}")]
    UnknownMiddleware { pattern: String, middleware: String },
}

struct PendingRoute {
    pattern: RoutePattern,
    handler: Handler,
    middleware: Vec<MiddlewareRef>,
}

/// Route table under construction.
#[derive(Default)]
pub struct UpgradeRouter {
    routes: Vec<PendingRoute>,
}

impl UpgradeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an upgrade route. Re-registering the same pattern string
    /// replaces the earlier entry but keeps its position.
    pub fn register(
        &mut self,
        pattern: &str,
        handler: Handler,
        middleware: Vec<MiddlewareRef>,
    ) -> Result<&mut Self, RouterError> {
        let route = PendingRoute {
            pattern: RoutePattern::parse(pattern)?,
            handler,
            middleware,
        };

        match self
            .routes
            .iter_mut()
            .find(|existing| existing.pattern.as_str() == pattern)
        {
            Some(existing) => *existing = route,
            None => self.routes.push(route),
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Freeze the table. Global middleware run ahead of each route's own.
    pub fn commit(
        self,
        global: &[MiddlewareRef],
        registry: &MiddlewareRegistry,
    ) -> Result<CommittedRouter, RouterError> {
        let mut entries = Vec::with_capacity(self.routes.len());

        for route in self.routes {
            let mut chain = MiddlewareChain::new();
            for reference in global.iter().chain(route.middleware.iter()) {
                let resolved = reference.resolve(registry).ok_or_else(|| {
                    RouterError::UnknownMiddleware {
                        pattern: route.pattern.as_str().to_string(),
                        middleware: reference.name().to_string(),
                    }
                })?;
                chain.push(resolved);
            }
            info!(
                "Upgrade route registered: {} (middleware: [{}])",
                route.pattern.as_str(),
                chain.names().join(", ")
            );
            entries.push(Arc::new(RouteEntry {
                pattern: route.pattern,
                handler: route.handler,
                middleware: chain,
            }));
        }

        Ok(CommittedRouter { entries })
    }
}

/// One committed route.
pub struct RouteEntry {
    pub pattern: RoutePattern,
    pub handler: Handler,
    pub middleware: MiddlewareChain,
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("pattern", &self.pattern.as_str())
            .field("handler", &self.handler)
            .field("middleware", &self.middleware.names())
            .finish()
    }
}

/// Result of a successful match.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<RouteEntry>,
    pub params: RouteParams,
}

/// Read-only route table.
#[derive(Debug, Default)]
pub struct CommittedRouter {
    entries: Vec<Arc<RouteEntry>>,
}

impl CommittedRouter {
    /// First route (by registration order) whose pattern matches `path`.
    /// `path` must already have its query string stripped.
    pub fn match_path(&self, path: &str) -> Option<RouteMatch> {
        self.entries.iter().find_map(|route| {
            route.pattern.matches(path).map(|params| RouteMatch {
                route: route.clone(),
                params,
            })
        })
    }

    pub fn patterns(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.pattern.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Middleware chain for upgrade requests.
//!
//! Middleware inspect and enrich the [`RequestContext`] before the protocol
//! upgrade. They run strictly in registration order (global first, then
//! per-route) and any of them can block the upgrade.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use roomcast_protocol::UpgradeError;

use crate::context::RequestContext;

/// Middleware result: whether to allow or block the upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiddlewareResult {
    /// Whether the upgrade should proceed
    pub allowed: bool,
    /// HTTP status answered when blocked
    pub status: u16,
    /// Feedback message if blocked
    pub feedback: Option<String>,
}

impl MiddlewareResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            status: 200,
            feedback: None,
        }
    }

    /// Block with `403 Forbidden`.
    pub fn block(feedback: impl Into<String>) -> Self {
        Self::reject(403, feedback)
    }

    pub fn reject(status: u16, feedback: impl Into<String>) -> Self {
        Self {
            allowed: false,
            status,
            feedback: Some(feedback.into()),
        }
    }
}

/// Trait for upgrade middleware.
pub trait Middleware: Send + Sync {
    /// Inspect or enrich the request before the upgrade.
    fn handle(
        &self,
        ctx: &mut RequestContext,
    ) -> impl std::future::Future<Output = MiddlewareResult> + Send;

    /// Middleware name for logs and rejection reports.
    fn name(&self) -> &str;
}

/// Object-safe version of Middleware trait: all refs share lifetime `'a`.
pub(crate) trait MiddlewareDyn: Send + Sync {
    fn handle_dyn<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = MiddlewareResult> + Send + 'a>>;

    fn name_dyn(&self) -> &str;
}

impl<T: Middleware> MiddlewareDyn for T {
    fn handle_dyn<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = MiddlewareResult> + Send + 'a>> {
        Box::pin(self.handle(ctx))
    }

    fn name_dyn(&self) -> &str {
        self.name()
    }
}

/// Synchronous middleware built from a closure.
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

impl<F> FnMiddleware<F>
where
    F: Fn(&mut RequestContext) -> MiddlewareResult + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut RequestContext) -> MiddlewareResult + Send + Sync,
{
    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareResult {
        (self.f)(ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Reference to a middleware as written at route registration: either a
/// name resolved from the [`MiddlewareRegistry`] at commit, or an instance.
#[derive(Clone)]
pub struct MiddlewareRef(RefKind);

#[derive(Clone)]
enum RefKind {
    Named(String),
    Inline(Arc<dyn MiddlewareDyn>),
}

impl MiddlewareRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self(RefKind::Named(name.into()))
    }

    pub fn inline<M: Middleware + 'static>(middleware: M) -> Self {
        Self(RefKind::Inline(Arc::new(middleware)))
    }

    pub fn name(&self) -> &str {
        match &self.0 {
            RefKind::Named(name) => name,
            RefKind::Inline(mw) => mw.name_dyn(),
        }
    }

    pub(crate) fn resolve(
        &self,
        registry: &MiddlewareRegistry,
    ) -> Option<Arc<dyn MiddlewareDyn>> {
        match &self.0 {
            RefKind::Named(name) => registry.get(name),
            RefKind::Inline(mw) => Some(mw.clone()),
        }
    }
}

impl std::fmt::Debug for MiddlewareRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MiddlewareRef").field(&self.name()).finish()
    }
}

impl From<&str> for MiddlewareRef {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

/// Named middleware available to routes and to the global config list.
#[derive(Default)]
pub struct MiddlewareRegistry {
    named: DashMap<String, Arc<dyn MiddlewareDyn>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: Middleware + 'static>(&self, name: impl Into<String>, middleware: M) {
        self.named.insert(name.into(), Arc::new(middleware));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Arc<dyn MiddlewareDyn>> {
        self.named.get(name).map(|m| m.value().clone())
    }
}

/// A chain of middleware executed in order.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn MiddlewareDyn>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, middleware: Arc<dyn MiddlewareDyn>) {
        self.middlewares.push(middleware);
    }

    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Run the chain. Stops at the first middleware that blocks or panics.
    pub async fn run(&self, ctx: &mut RequestContext) -> Result<(), UpgradeError> {
        for mw in &self.middlewares {
            let outcome = AssertUnwindSafe(mw.handle_dyn(ctx)).catch_unwind().await;
            match outcome {
                Ok(result) if result.allowed => continue,
                Ok(result) => {
                    return Err(UpgradeError::middleware_rejected(
                        mw.name_dyn(),
                        result.status,
                        result
                            .feedback
                            .unwrap_or_else(|| "Upgrade blocked by middleware".into()),
                    ));
                }
                Err(_) => {
                    return Err(UpgradeError::middleware_rejected(
                        mw.name_dyn(),
                        500,
                        "middleware panicked",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name_dyn()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

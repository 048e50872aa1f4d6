//! Route handlers.
//!
//! A route points either at a plain async function or at a named controller
//! method. Controller methods are looked up in the [`ControllerRegistry`]
//! when a session opens, so both shapes resolve to the same callable.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use crate::context::SessionContext;
use crate::session::SessionError;

/// Method invoked when a controller route names none.
pub const DEFAULT_METHOD: &str = "handle";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("controller not bound: {0}")]
    ControllerNotFound(String),
    #[error("controller {controller} has no method {method}")]
    MethodNotFound { controller: String, method: String },
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type HandlerResult = Result<(), HandlerError>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
type HandlerFn = Arc<dyn Fn(SessionContext) -> HandlerFuture + Send + Sync>;

/// A controller exposing named session handlers.
pub trait Controller: Send + Sync {
    /// Whether `method` is a session handler on this controller.
    fn handles(&self, method: &str) -> bool;

    /// Invoke `method`. Only called after `handles(method)` returned true.
    fn call(self: Arc<Self>, method: &str, ctx: SessionContext) -> HandlerFuture;
}

/// Where a route's handler comes from.
#[derive(Clone)]
pub enum Handler {
    Function(HandlerFn),
    Method { controller: String, method: String },
}

impl Handler {
    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn(SessionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Function(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    /// Controller method; `None` selects [`DEFAULT_METHOD`].
    pub fn method(controller: impl Into<String>, method: Option<&str>) -> Self {
        Self::Method {
            controller: controller.into(),
            method: method.unwrap_or(DEFAULT_METHOD).to_string(),
        }
    }

    /// Resolve to a callable. Controller lookups happen here, per session.
    pub fn resolve(&self, controllers: &ControllerRegistry) -> Result<ResolvedHandler, HandlerError> {
        match self {
            Self::Function(f) => Ok(ResolvedHandler(Resolved::Function(f.clone()))),
            Self::Method { controller, method } => {
                let instance = controllers
                    .make(controller)
                    .ok_or_else(|| HandlerError::ControllerNotFound(controller.clone()))?;
                if !instance.handles(method) {
                    return Err(HandlerError::MethodNotFound {
                        controller: controller.clone(),
                        method: method.clone(),
                    });
                }
                Ok(ResolvedHandler(Resolved::Method {
                    instance,
                    method: method.clone(),
                }))
            }
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Handler::Function"),
            Self::Method { controller, method } => write!(f, "Handler::Method({controller}.{method})"),
        }
    }
}

/// A handler ready to run.
pub struct ResolvedHandler(Resolved);

enum Resolved {
    Function(HandlerFn),
    Method {
        instance: Arc<dyn Controller>,
        method: String,
    },
}

impl ResolvedHandler {
    pub fn invoke(self, ctx: SessionContext) -> HandlerFuture {
        match self.0 {
            Resolved::Function(f) => f(ctx),
            Resolved::Method { instance, method } => instance.call(&method, ctx),
        }
    }
}

type ControllerFactory = Arc<dyn Fn() -> Arc<dyn Controller> + Send + Sync>;

/// Controller bindings, keyed by name.
#[derive(Default)]
pub struct ControllerRegistry {
    factories: DashMap<String, ControllerFactory>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a factory; a fresh instance is made for every session.
    pub fn bind<C, F>(&self, name: impl Into<String>, factory: F)
    where
        C: Controller + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.factories
            .insert(name.into(), Arc::new(move || Arc::new(factory()) as Arc<dyn Controller>));
    }

    /// Bind one shared instance.
    pub fn singleton<C: Controller + 'static>(&self, name: impl Into<String>, controller: C) {
        let instance: Arc<dyn Controller> = Arc::new(controller);
        self.factories
            .insert(name.into(), Arc::new(move || instance.clone()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn make(&self, name: &str) -> Option<Arc<dyn Controller>> {
        let factory = self.factories.get(name)?.value().clone();
        Some(factory())
    }
}

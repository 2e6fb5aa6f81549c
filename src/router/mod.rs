mod dispatch;
mod pattern;
mod trie;

pub use trie::RouteMatch;

use crate::exchange::Exchange;
use crate::handler::{CleanupHook, Handler, Middleware};
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use dispatch::DispatchStack;
use pattern::Pattern;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use trie::{RouteChain, RouteTable};

/// Errors raised synchronously during registration. Always fatal to that
/// registration call; nothing is retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Method '{method}' is not a recognized verb.")]
    InvalidMethod { method: String },

    #[error("Path '{path}' is invalid. {message}")]
    InvalidPath { path: String, message: String },

    #[error("Wildcard segment in '{path}' must be the final segment.")]
    WildcardPosition { path: String },

    #[error("Parameter name conflict in '{path}': this level is already registered as ':{existing}'.")]
    ParamConflict { path: String, existing: String },

    #[error("No terminal handler registered for {method} '{path}'.")]
    MissingTerminalHandler { method: String, path: String },
}

impl ConfigError {
    #[inline]
    pub(crate) fn invalid_method(method: impl Into<String>) -> Self {
        Self::InvalidMethod {
            method: method.into(),
        }
    }

    #[inline]
    pub(crate) fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    #[inline]
    pub(crate) fn wildcard_position(path: impl Into<String>) -> Self {
        Self::WildcardPosition { path: path.into() }
    }

    #[inline]
    pub(crate) fn param_conflict(path: impl Into<String>, existing: impl Into<String>) -> Self {
        Self::ParamConflict {
            path: path.into(),
            existing: existing.into(),
        }
    }

    #[inline]
    pub(crate) fn missing_terminal(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::MissingTerminalHandler {
            method: method.into(),
            path: path.into(),
        }
    }
}

/// Resolver outcomes for a request that cannot be matched.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No node matches the path at all, not even a wildcard ancestor.
    #[error("No route matches path '{path}'.")]
    NotFound { path: String },

    /// A node matches the path but no verb, `HEAD` fallback or `ANY` applies.
    #[error("No handler for {method} at path '{path}'.")]
    MethodNotAllowed { method: Method, path: String },
}

impl ResolveError {
    #[inline]
    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    #[inline]
    pub(crate) fn method_not_allowed(method: Method, path: impl Into<String>) -> Self {
        Self::MethodNotAllowed {
            method,
            path: path.into(),
        }
    }
}

/// Conversion of the accepted method spellings into a verb list: a typed
/// `Method`, a single verb string, a comma/whitespace-delimited list, or a
/// slice of either.
pub trait IntoMethods {
    fn into_methods(self) -> Result<Vec<Method>, ConfigError>;
}

impl IntoMethods for Method {
    fn into_methods(self) -> Result<Vec<Method>, ConfigError> {
        Ok(vec![self])
    }
}

impl IntoMethods for &str {
    fn into_methods(self) -> Result<Vec<Method>, ConfigError> {
        let mut methods = Vec::new();
        for token in self
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            match Method::parse(token) {
                Some(method) => methods.push(method),
                None => return Err(ConfigError::invalid_method(token)),
            }
        }
        if methods.is_empty() {
            return Err(ConfigError::invalid_method(self));
        }
        Ok(methods)
    }
}

impl IntoMethods for String {
    fn into_methods(self) -> Result<Vec<Method>, ConfigError> {
        self.as_str().into_methods()
    }
}

impl IntoMethods for &[Method] {
    fn into_methods(self) -> Result<Vec<Method>, ConfigError> {
        if self.is_empty() {
            return Err(ConfigError::invalid_method("<empty>"));
        }
        Ok(self.to_vec())
    }
}

impl<const N: usize> IntoMethods for [Method; N] {
    fn into_methods(self) -> Result<Vec<Method>, ConfigError> {
        self.as_slice().into_methods()
    }
}

impl IntoMethods for Vec<Method> {
    fn into_methods(self) -> Result<Vec<Method>, ConfigError> {
        self.as_slice().into_methods()
    }
}

impl IntoMethods for &[&str] {
    fn into_methods(self) -> Result<Vec<Method>, ConfigError> {
        let mut methods = Vec::new();
        for token in self {
            methods.extend(token.into_methods()?);
        }
        if methods.is_empty() {
            return Err(ConfigError::invalid_method("<empty>"));
        }
        Ok(methods)
    }
}

impl<const N: usize> IntoMethods for &[&str; N] {
    fn into_methods(self) -> Result<Vec<Method>, ConfigError> {
        self.as_slice().into_methods()
    }
}

/// Where a registry middleware applies: everywhere, or to requests whose path
/// matches any of a set of patterns.
enum Scope {
    Global,
    Patterns(Vec<Pattern>),
}

impl Scope {
    fn matches(&self, path: &str) -> bool {
        match self {
            Scope::Global => true,
            Scope::Patterns(patterns) => patterns.iter().any(|p| p.matches(path)),
        }
    }
}

/// One entry of the middleware registry. Entries keep their registration
/// order; that order is the execution order and is never re-sorted.
struct MiddlewareEntry {
    scope: Scope,
    middleware: Middleware,
}

/// Read-only description of one registered route, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDescriptor {
    pub method: Method,
    pub path: String,
    pub handlers: Vec<String>,
}

/// The routing engine: route table, middleware registry and cleanup hook.
///
/// # Behavior
/// All registration happens through `&mut self` before the first dispatch;
/// `handle` takes `&self`, so the borrow checker enforces the
/// registration-then-dispatch discipline and the shared tables stay read-only
/// across invocations. Every call to [`Router::handle`] terminates in exactly
/// one finalized response, whatever happens inside the stack.
pub struct Router {
    table: RouteTable,
    middleware: Vec<MiddlewareEntry>,
    cleanup: Option<Arc<dyn CleanupHook>>,
    manifest: Vec<RouteDescriptor>,
    dispatched: AtomicBool,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            table: RouteTable::new(),
            middleware: Vec::new(),
            cleanup: None,
            manifest: Vec::new(),
            dispatched: AtomicBool::new(false),
        }
    }

    /// Registers a handler chain for one or more verbs under a path pattern.
    ///
    /// The last entry of `chain` must be a normal-class handler; it becomes
    /// the route's terminal handler. Registering the same verb and path again
    /// overwrites the earlier chain; an explicit verb always beats `ANY` for
    /// the same path regardless of registration order.
    ///
    /// # Errors
    /// Unrecognized verb values, a wildcard that is not the final segment, a
    /// parameter name conflict, or a chain without a terminal handler.
    pub fn register(
        &mut self,
        methods: impl IntoMethods,
        path: &str,
        chain: Vec<Middleware>,
    ) -> Result<(), ConfigError> {
        let methods = methods.into_methods()?;
        let parsed = Pattern::parse(path)?;
        if !matches!(chain.last(), Some(Middleware::Normal(_))) {
            let label = methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(",");
            return Err(ConfigError::missing_terminal(label, parsed.canonical()));
        }
        let chain = Arc::new(RouteChain::new(chain));
        for method in methods {
            log::debug!(
                "registering {method} '{}' ({} entries)",
                parsed.canonical(),
                chain.entries().len()
            );
            self.table.insert(method, &parsed, chain.clone())?;
            self.record_route(method, parsed.canonical(), chain.handler_names());
        }
        Ok(())
    }

    pub fn get(&mut self, path: &str, handler: impl Handler + 'static) -> Result<(), ConfigError> {
        self.register(Method::Get, path, vec![Middleware::normal(handler)])
    }

    pub fn post(&mut self, path: &str, handler: impl Handler + 'static) -> Result<(), ConfigError> {
        self.register(Method::Post, path, vec![Middleware::normal(handler)])
    }

    pub fn put(&mut self, path: &str, handler: impl Handler + 'static) -> Result<(), ConfigError> {
        self.register(Method::Put, path, vec![Middleware::normal(handler)])
    }

    pub fn delete(
        &mut self,
        path: &str,
        handler: impl Handler + 'static,
    ) -> Result<(), ConfigError> {
        self.register(Method::Delete, path, vec![Middleware::normal(handler)])
    }

    pub fn patch(
        &mut self,
        path: &str,
        handler: impl Handler + 'static,
    ) -> Result<(), ConfigError> {
        self.register(Method::Patch, path, vec![Middleware::normal(handler)])
    }

    pub fn head(&mut self, path: &str, handler: impl Handler + 'static) -> Result<(), ConfigError> {
        self.register(Method::Head, path, vec![Middleware::normal(handler)])
    }

    pub fn options(
        &mut self,
        path: &str,
        handler: impl Handler + 'static,
    ) -> Result<(), ConfigError> {
        self.register(Method::Options, path, vec![Middleware::normal(handler)])
    }

    /// Registers a fallback chain used only when no verb-specific chain
    /// matches the path.
    pub fn any(&mut self, path: &str, handler: impl Handler + 'static) -> Result<(), ConfigError> {
        self.register(Method::Any, path, vec![Middleware::normal(handler)])
    }

    /// Appends a middleware that applies to every request.
    pub fn attach(&mut self, middleware: Middleware) {
        self.middleware.push(MiddlewareEntry {
            scope: Scope::Global,
            middleware,
        });
    }

    /// Appends a middleware scoped to one or more path patterns; it runs when
    /// any of them matches the request path.
    pub fn attach_to(
        &mut self,
        patterns: &[&str],
        middleware: Middleware,
    ) -> Result<(), ConfigError> {
        let mut parsed = Vec::with_capacity(patterns.len());
        for raw in patterns {
            parsed.push(Pattern::parse(raw)?);
        }
        self.middleware.push(MiddlewareEntry {
            scope: Scope::Patterns(parsed),
            middleware,
        });
        Ok(())
    }

    /// Installs the post-dispatch cleanup hook, replacing any previous one.
    pub fn set_cleanup(&mut self, hook: impl CleanupHook + 'static) {
        if self.cleanup.is_some() {
            log::debug!("replacing previously installed cleanup hook");
        }
        self.cleanup = Some(Arc::new(hook));
    }

    /// Invokes `configure` immediately with a registrar view scoped to
    /// `prefix`. Registrations inside compose the prefix onto their own paths
    /// by string concatenation; nested modules compose to arbitrary depth.
    /// There is no cycle detection: an unconditional self-registration will
    /// not terminate, which is the caller's responsibility to bound.
    pub fn module<F>(&mut self, prefix: &str, configure: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut RouterScope<'_>) -> Result<(), ConfigError>,
    {
        let mut scope = RouterScope {
            router: self,
            prefix: prefix.to_string(),
        };
        configure(&mut scope)
    }

    /// Every registered route in registration order, for diagnostics.
    /// Overwritten registrations keep their original position with the
    /// replacement chain's handler names.
    pub fn routes(&self) -> &[RouteDescriptor] {
        &self.manifest
    }

    /// Resolves a method and path against the route table without
    /// dispatching.
    pub fn resolve(&self, method: Method, path: &str) -> Result<RouteMatch, ResolveError> {
        self.table.resolve(method, path)
    }

    /// Dispatches one request and always returns exactly one finalized
    /// response: matched routes run their assembled stack; `NotFound` and
    /// `MethodNotAllowed` become generic 404/405 responses; runtime errors
    /// are recovered by error middleware or synthesized into a default error
    /// response. The cleanup hook runs once on every path.
    pub async fn handle(&self, request: Request) -> Response {
        let cold_start = !self.dispatched.swap(true, Ordering::Relaxed);
        let method = request.method();
        let path = request.path().to_string();
        let mut exchange = Exchange::new(request);
        exchange.set_cold_start(cold_start);
        log::trace!("{} dispatching {method} '{path}'", exchange.uuid());

        let mut discard_body = false;
        match self.table.resolve(method, &path) {
            Ok(found) => {
                let (chain, params, pattern, discard) = found.into_parts();
                discard_body = discard;
                exchange.set_route(pattern, params);
                let stack = self.assemble(&path, &chain);
                dispatch::run(&stack, &mut exchange).await;
            }
            Err(error @ ResolveError::NotFound { .. }) => {
                respond_resolve_failure(&mut exchange, 404, "not found", &error);
            }
            Err(error @ ResolveError::MethodNotAllowed { .. }) => {
                respond_resolve_failure(&mut exchange, 405, "method not allowed", &error);
            }
        }
        dispatch::finalize(&mut exchange, discard_body, self.cleanup.as_ref()).await;
        exchange.into_response()
    }

    /// Builds the execution stack for one invocation: scope-matched registry
    /// entries in registration order, then the route chain. Error-class
    /// entries go to the error stack in the same relative order.
    fn assemble(&self, path: &str, chain: &RouteChain) -> DispatchStack {
        let mut normal = Vec::new();
        let mut error = Vec::new();
        for entry in &self.middleware {
            if entry.scope.matches(path) {
                match &entry.middleware {
                    Middleware::Normal(handler) => normal.push(handler.clone()),
                    Middleware::Error(handler) => error.push(handler.clone()),
                }
            }
        }
        for middleware in chain.entries() {
            match middleware {
                Middleware::Normal(handler) => normal.push(handler.clone()),
                Middleware::Error(handler) => error.push(handler.clone()),
            }
        }
        DispatchStack { normal, error }
    }

    fn record_route(&mut self, method: Method, path: &str, handlers: Vec<String>) {
        match self
            .manifest
            .iter_mut()
            .find(|d| d.method == method && d.path == path)
        {
            Some(existing) => existing.handlers = handlers,
            None => self.manifest.push(RouteDescriptor {
                method,
                path: path.to_string(),
                handlers,
            }),
        }
    }
}

fn respond_resolve_failure(exchange: &mut Exchange, status: u16, message: &str, error: &ResolveError) {
    log::debug!("{} {error}", exchange.uuid());
    let response = exchange.response_mut();
    response.set_status(status);
    let body = serde_json::json!({
        "message": message,
        "detail": error.to_string(),
    });
    if let Err(err) = response.set_json(&body) {
        log::error!("failed to encode {status} body: {err}");
    }
}

/// Registrar view produced by [`Router::module`]: every registration made
/// through it has the scope's prefix concatenated in front of its path.
pub struct RouterScope<'r> {
    router: &'r mut Router,
    prefix: String,
}

impl RouterScope<'_> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn register(
        &mut self,
        methods: impl IntoMethods,
        path: &str,
        chain: Vec<Middleware>,
    ) -> Result<(), ConfigError> {
        let full = format!("{}{}", self.prefix, path);
        self.router.register(methods, &full, chain)
    }

    pub fn get(&mut self, path: &str, handler: impl Handler + 'static) -> Result<(), ConfigError> {
        self.register(Method::Get, path, vec![Middleware::normal(handler)])
    }

    pub fn post(&mut self, path: &str, handler: impl Handler + 'static) -> Result<(), ConfigError> {
        self.register(Method::Post, path, vec![Middleware::normal(handler)])
    }

    pub fn any(&mut self, path: &str, handler: impl Handler + 'static) -> Result<(), ConfigError> {
        self.register(Method::Any, path, vec![Middleware::normal(handler)])
    }

    /// Nested module: the child prefix is concatenated onto this scope's.
    pub fn module<F>(&mut self, prefix: &str, configure: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut RouterScope<'_>) -> Result<(), ConfigError>,
    {
        let mut scope = RouterScope {
            router: self.router,
            prefix: format!("{}{}", self.prefix, prefix),
        };
        configure(&mut scope)
    }
}

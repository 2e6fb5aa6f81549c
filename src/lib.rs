//! Request routing and middleware dispatch for stateless HTTP-style
//! invocations.
//!
//! A [`Router`] is configured once: routes go into a trie keyed by path
//! segment kind (static, `:param`, `*` wildcard), middleware into an ordered
//! registry (global or scoped to path patterns). Every subsequent call to
//! [`Router::handle`] resolves the request against the read-only tables,
//! runs the assembled stack as a cooperative state machine, and terminates in
//! exactly one finalized response, even when a handler fails.
//!
//! ```rust,ignore
//! use trellis::{Flow, Method, Middleware, Request, Router, handler_fn};
//!
//! let mut router = Router::new();
//! router.attach(Middleware::normal(handler_fn("log", |ex| {
//!     Box::pin(async move { Ok(Flow::Continue) })
//! })));
//! router.get("/users/:id", handler_fn("user", |ex| {
//!     let id = ex.param("id").unwrap_or_default().to_string();
//!     Box::pin(async move { Ok(Flow::respond(id)) })
//! }))?;
//!
//! let response = router.handle(Request::new(Method::Get, "/users/42")).await;
//! ```

pub mod exchange;
pub mod handler;
pub mod method;
pub mod request;
pub mod response;
pub mod router;
pub mod status;

pub use exchange::Exchange;
pub use handler::{
    CleanupHook, ErrorHandler, Handler, Middleware, cleanup_fn, error_handler_fn, handler_fn,
};
pub use method::Method;
pub use request::Request;
pub use response::Response;
pub use router::{ConfigError, ResolveError, RouteDescriptor, Router, RouterScope};
pub use status::{Flow, HandlerError};

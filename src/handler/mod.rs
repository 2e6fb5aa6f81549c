use crate::exchange::Exchange;
use crate::status::{Flow, HandlerError};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::borrow::Cow;
use std::sync::Arc;

pub type SharedHandler = Arc<dyn Handler>;
pub type SharedErrorHandler = Arc<dyn ErrorHandler>;

/// A stack entry that runs while dispatch is in its normal mode.
///
/// Implementations mutate the exchange (typically the response accumulator)
/// and return a [`Flow`] verdict, or an error to move dispatch into error
/// mode. The terminal handler of every route is a `Handler`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn exec(&self, exchange: &mut Exchange) -> Result<Flow, HandlerError>;

    fn name(&self) -> &str {
        "anonymous"
    }
}

/// A stack entry that runs only while dispatch is in error mode.
///
/// Receives the captured error as its first argument. The same
/// continue/short-circuit rules apply as for normal entries; an error
/// returned from here is a defect and terminates dispatch.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn exec(
        &self,
        error: &HandlerError,
        exchange: &mut Exchange,
    ) -> Result<Flow, HandlerError>;

    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Post-dispatch hook invoked exactly once per invocation, after the stack is
/// done and before the response is emitted. Failures are logged and never
/// block emission.
#[async_trait]
pub trait CleanupHook: Send + Sync {
    async fn run(&self, exchange: &Exchange) -> Result<(), HandlerError>;
}

/// A middleware tagged with its dispatch class.
///
/// The class is fixed here, at registration time, and never re-inspected per
/// invocation: `Normal` entries run during success-mode dispatch, `Error`
/// entries only once dispatch has switched to error mode.
#[derive(Clone)]
pub enum Middleware {
    Normal(SharedHandler),
    Error(SharedErrorHandler),
}

impl Middleware {
    pub fn normal(handler: impl Handler + 'static) -> Self {
        Middleware::Normal(Arc::new(handler))
    }

    pub fn error(handler: impl ErrorHandler + 'static) -> Self {
        Middleware::Error(Arc::new(handler))
    }

    pub(crate) fn is_error(&self) -> bool {
        matches!(self, Middleware::Error(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Middleware::Normal(handler) => handler.name(),
            Middleware::Error(handler) => handler.name(),
        }
    }
}

type HandlerClosure =
    dyn for<'a> Fn(&'a mut Exchange) -> BoxFuture<'a, Result<Flow, HandlerError>> + Send + Sync;

type ErrorHandlerClosure = dyn for<'a> Fn(&'a HandlerError, &'a mut Exchange) -> BoxFuture<'a, Result<Flow, HandlerError>>
    + Send
    + Sync;

type CleanupClosure =
    dyn for<'a> Fn(&'a Exchange) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync;

/// [`Handler`] backed by a boxed async closure.
pub struct FnHandler {
    name: Cow<'static, str>,
    func: Box<HandlerClosure>,
}

#[async_trait]
impl Handler for FnHandler {
    async fn exec(&self, exchange: &mut Exchange) -> Result<Flow, HandlerError> {
        (self.func)(exchange).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wraps an async closure as a normal-class handler.
///
/// The closure must return a boxed future, e.g.
/// `handler_fn("hello", |ex| Box::pin(async move { Ok(Flow::respond("hi")) }))`.
pub fn handler_fn<F>(name: &'static str, func: F) -> FnHandler
where
    F: for<'a> Fn(&'a mut Exchange) -> BoxFuture<'a, Result<Flow, HandlerError>>
        + Send
        + Sync
        + 'static,
{
    FnHandler {
        name: Cow::Borrowed(name),
        func: Box::new(func),
    }
}

/// [`ErrorHandler`] backed by a boxed async closure.
pub struct FnErrorHandler {
    name: Cow<'static, str>,
    func: Box<ErrorHandlerClosure>,
}

#[async_trait]
impl ErrorHandler for FnErrorHandler {
    async fn exec(
        &self,
        error: &HandlerError,
        exchange: &mut Exchange,
    ) -> Result<Flow, HandlerError> {
        (self.func)(error, exchange).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wraps an async closure as an error-class handler.
pub fn error_handler_fn<F>(name: &'static str, func: F) -> FnErrorHandler
where
    F: for<'a> Fn(&'a HandlerError, &'a mut Exchange) -> BoxFuture<'a, Result<Flow, HandlerError>>
        + Send
        + Sync
        + 'static,
{
    FnErrorHandler {
        name: Cow::Borrowed(name),
        func: Box::new(func),
    }
}

/// [`CleanupHook`] backed by a boxed async closure.
pub struct FnCleanupHook {
    func: Box<CleanupClosure>,
}

#[async_trait]
impl CleanupHook for FnCleanupHook {
    async fn run(&self, exchange: &Exchange) -> Result<(), HandlerError> {
        (self.func)(exchange).await
    }
}

/// Wraps an async closure as a cleanup hook.
pub fn cleanup_fn<F>(func: F) -> FnCleanupHook
where
    F: for<'a> Fn(&'a Exchange) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync + 'static,
{
    FnCleanupHook {
        func: Box::new(func),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;
    use crate::request::Request;

    #[tokio::test]
    async fn closure_handler_runs_and_reports_its_name() {
        let handler = handler_fn("greeter", |exchange| {
            Box::pin(async move {
                exchange.response_mut().set_status(201);
                Ok(Flow::respond("hello"))
            })
        });
        assert_eq!(handler.name(), "greeter");

        let mut exchange = Exchange::new(Request::new(Method::Get, "/greet"));
        match handler.exec(&mut exchange).await {
            Ok(Flow::Respond(body)) => assert_eq!(body, b"hello"),
            other => panic!("unexpected verdict: {other:?}"),
        }
        assert_eq!(exchange.response().status(), 201);
    }

    #[tokio::test]
    async fn closure_error_handler_sees_the_captured_error() {
        let handler = error_handler_fn("recover", |error, exchange| {
            Box::pin(async move {
                exchange
                    .response_mut()
                    .set_status(error.status().unwrap_or(500));
                Ok(Flow::respond(error.message().to_string()))
            })
        });

        let mut exchange = Exchange::new(Request::new(Method::Get, "/fail"));
        let error = HandlerError::with_status(502, "upstream down");
        match handler.exec(&error, &mut exchange).await {
            Ok(Flow::Respond(body)) => assert_eq!(body, b"upstream down"),
            other => panic!("unexpected verdict: {other:?}"),
        }
        assert_eq!(exchange.response().status(), 502);
    }

    #[test]
    fn middleware_class_is_tagged_at_construction() {
        let normal = Middleware::normal(handler_fn("n", |_| {
            Box::pin(async move { Ok(Flow::Continue) })
        }));
        let error = Middleware::error(error_handler_fn("e", |_, _| {
            Box::pin(async move { Ok(Flow::Continue) })
        }));
        assert!(!normal.is_error());
        assert!(error.is_error());
        assert_eq!(normal.name(), "n");
        assert_eq!(error.name(), "e");
    }
}

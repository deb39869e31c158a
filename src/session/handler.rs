//! Request handlers and the factories that build them per connection.

use futures_util::future::{self, BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

use crate::error::{BoxError, ServiceError, SharedError, TERMINATING_SESSION};
use crate::session::ClientConnection;

/// Request/response logic for one connection.
pub trait Handler<Req, Rep>: Send + Sync + 'static {
    fn call(&self, req: Req) -> BoxFuture<'static, Result<Rep, ServiceError>>;
}

/// Shared, type-erased handler.
pub type BoxHandler<Req, Rep> = Arc<dyn Handler<Req, Rep>>;

/// Asynchronously builds a handler for a newly accepted connection.
///
/// While the returned future runs, the connection's peer certificate (if
/// any) is available through [`crate::session::context::peer_certificate`].
pub trait HandlerFactory<Req, Rep>: Send + Sync + 'static {
    fn create(&self, conn: Arc<ClientConnection>) -> BoxFuture<'static, Result<BoxHandler<Req, Rep>, BoxError>>;
}

/// Handler backed by an async closure. See [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap `f` as a [`Handler`].
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

impl<Req, Rep, F, Fut> Handler<Req, Rep> for HandlerFn<F>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Rep, ServiceError>> + Send + 'static,
{
    fn call(&self, req: Req) -> BoxFuture<'static, Result<Rep, ServiceError>> {
        (self.f)(req).boxed()
    }
}

/// Factory backed by an async closure. See [`factory_fn`].
#[derive(Clone)]
pub struct FactoryFn<F> {
    f: F,
}

/// Wrap `f` as a [`HandlerFactory`].
pub fn factory_fn<F>(f: F) -> FactoryFn<F> {
    FactoryFn { f }
}

impl<Req, Rep, F, Fut> HandlerFactory<Req, Rep> for FactoryFn<F>
where
    F: Fn(Arc<ClientConnection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BoxHandler<Req, Rep>, BoxError>> + Send + 'static,
{
    fn create(&self, conn: Arc<ClientConnection>) -> BoxFuture<'static, Result<BoxHandler<Req, Rep>, BoxError>> {
        (self.f)(conn).boxed()
    }
}

/// Hands the same handler to every connection.
pub struct SharedHandlerFactory<Req, Rep> {
    handler: BoxHandler<Req, Rep>,
}

impl<Req, Rep> SharedHandlerFactory<Req, Rep> {
    pub fn new(handler: BoxHandler<Req, Rep>) -> Self {
        Self { handler }
    }
}

impl<Req, Rep> HandlerFactory<Req, Rep> for SharedHandlerFactory<Req, Rep>
where
    Req: 'static,
    Rep: 'static,
{
    fn create(&self, _conn: Arc<ClientConnection>) -> BoxFuture<'static, Result<BoxHandler<Req, Rep>, BoxError>> {
        future::ready(Ok(Arc::clone(&self.handler))).boxed()
    }
}

/// Handler installed on a degraded session: rejects every request with the
/// error that prevented the real handler from being built.
#[derive(Debug, Clone)]
pub struct RejectingHandler {
    rejection: ServiceError,
}

impl RejectingHandler {
    pub fn new(cause: SharedError) -> Self {
        Self {
            rejection: ServiceError::rejected(TERMINATING_SESSION, cause),
        }
    }

    /// The rejection returned for every request.
    pub fn rejection(&self) -> &ServiceError {
        &self.rejection
    }
}

impl<Req, Rep> Handler<Req, Rep> for RejectingHandler
where
    Req: Send + 'static,
    Rep: Send + 'static,
{
    fn call(&self, _req: Req) -> BoxFuture<'static, Result<Rep, ServiceError>> {
        future::ready(Err(self.rejection.clone())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::share;
    use std::error::Error as _;

    #[tokio::test]
    async fn rejecting_handler_ignores_input() {
        let handler = RejectingHandler::new(share("auth unavailable".into()));

        for req in ["a", "b"] {
            let err = Handler::<&str, String>::call(&handler, req).await.unwrap_err();
            assert!(err.is_rejection());
            assert_eq!(err.to_string(), TERMINATING_SESSION);
            assert_eq!(err.source().unwrap().to_string(), "auth unavailable");
        }
    }

    #[tokio::test]
    async fn handler_fn_calls_closure() {
        let echo = handler_fn(|req: String| async move { Ok::<_, ServiceError>(req.to_uppercase()) });
        assert_eq!(echo.call("hi".to_string()).await.unwrap(), "HI");
    }
}

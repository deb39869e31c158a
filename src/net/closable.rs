//! The close capability shared by streams, dispatchers and sessions.

use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Anything that can be asked to shut down within a deadline.
///
/// Implementations must be idempotent: closing something that is already
/// closed resolves immediately.
pub trait Closable: Send + Sync + 'static {
    /// Close, allowing up to `deadline` for a graceful shutdown.
    fn close(&self, deadline: Duration) -> BoxFuture<'_, ()>;
}

impl<T: Closable + ?Sized> Closable for Arc<T> {
    fn close(&self, deadline: Duration) -> BoxFuture<'_, ()> {
        (**self).close(deadline)
    }
}

impl<T: Closable + ?Sized> Closable for Box<T> {
    fn close(&self, deadline: Duration) -> BoxFuture<'_, ()> {
        (**self).close(deadline)
    }
}

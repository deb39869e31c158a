//! Error types shared across the session core.
//!
//! Handler construction fails with a [`BoxError`]; request processing fails
//! with a [`ServiceError`]. Causes are held behind an `Arc` so a single
//! rejection value can be handed out to every request of a degraded session.

use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by handler factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shareable error used as the cause of a [`ServiceError`].
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Message attached to every request answered by a degraded session.
pub const TERMINATING_SESSION: &str = "Terminating session and ignoring request";

/// Errors produced while serving a single request.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The request was refused without being processed.
    #[error("{message}")]
    Rejected {
        message: String,
        #[source]
        cause: SharedError,
    },

    /// The handler ran and failed.
    #[error("request failed: {0}")]
    Failed(#[source] SharedError),

    /// The session was closed before the request could be answered.
    #[error("session closed")]
    Closed,
}

impl ServiceError {
    /// Build a rejection carrying `cause`.
    pub fn rejected(message: impl Into<String>, cause: SharedError) -> Self {
        ServiceError::Rejected {
            message: message.into(),
            cause,
        }
    }

    /// The underlying cause, if any.
    pub fn cause(&self) -> Option<&SharedError> {
        match self {
            ServiceError::Rejected { cause, .. } => Some(cause),
            ServiceError::Failed(cause) => Some(cause),
            ServiceError::Closed => None,
        }
    }

    /// Returns true for rejections issued by a degraded session.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ServiceError::Rejected { .. })
    }
}

/// Convert a handler factory failure into a shareable cause.
pub fn share(err: BoxError) -> SharedError {
    Arc::from(err)
}

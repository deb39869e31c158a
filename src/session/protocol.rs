//! Wire-protocol hooks used by dispatchers.
//!
//! The session core never inspects messages. A `Protocol` only tells a
//! dispatcher how to report a failed request and how to say goodbye before
//! the connection is dropped.

use crate::error::ServiceError;

/// Protocol-specific message types and framing hooks.
pub trait Protocol: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    /// Protocol name, used in registry keys and logs.
    fn name(&self) -> &str;

    /// Response written in place of a reply when a request fails.
    fn error_response(&self, err: &ServiceError) -> Self::Response;

    /// Final message written on a graceful close, if the protocol has one.
    fn goodbye(&self) -> Option<Self::Response> {
        None
    }
}

/// Newline-delimited UTF-8 text protocol.
///
/// Each line is a request, each reply a line. Failures are reported as
/// `ERR <message>` and a graceful close sends `BYE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineProtocol;

pub const LINE_GOODBYE: &str = "BYE";

impl Protocol for LineProtocol {
    type Request = String;
    type Response = String;

    fn name(&self) -> &str {
        "line"
    }

    fn error_response(&self, err: &ServiceError) -> String {
        match err.cause() {
            Some(cause) if !matches!(err, ServiceError::Failed(_)) => format!("ERR {}: {}", err, cause),
            _ => format!("ERR {}", err),
        }
    }

    fn goodbye(&self) -> Option<String> {
        Some(LINE_GOODBYE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{share, TERMINATING_SESSION};

    #[test]
    fn rejection_line_carries_message_and_cause() {
        let err = ServiceError::rejected(TERMINATING_SESSION, share("auth unavailable".into()));
        assert_eq!(
            LineProtocol.error_response(&err),
            "ERR Terminating session and ignoring request: auth unavailable"
        );
    }

    #[test]
    fn failure_line_is_not_duplicated() {
        let err = ServiceError::Failed(share("boom".into()));
        assert_eq!(LineProtocol.error_response(&err), "ERR request failed: boom");
        assert_eq!(LineProtocol.error_response(&ServiceError::Closed), "ERR session closed");
    }
}

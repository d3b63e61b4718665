//! Error types for the sync server.

use tablesync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Push batch over the configured limit.
    #[error("too many operations: {count} > {limit}")]
    TooManyOperations {
        /// Operations in the request.
        count: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Unknown route or resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request body could not be decoded, or a response encoded.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::TooManyOperations { .. }
                | ServerError::NotFound(_)
                | ServerError::Codec(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::NotFound(_) => 404,
            ServerError::TooManyOperations { .. } => 413,
            ServerError::InvalidRequest(_) | ServerError::Codec(_) => 400,
            ServerError::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert!(ServerError::Codec(ProtocolError::Codec("eof".into())).is_client_error());
    }

    #[test]
    fn status_codes() {
        assert_eq!(ServerError::NotFound("/x".into()).status(), 404);
        assert_eq!(
            ServerError::TooManyOperations { count: 5, limit: 2 }.status(),
            413
        );
        assert_eq!(ServerError::Internal("x".into()).status(), 500);
    }

    #[test]
    fn error_display() {
        let msg = ServerError::TooManyOperations {
            count: 10,
            limit: 5,
        }
        .to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("5"));
    }
}

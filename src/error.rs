//! Error types for textwire-rpc.

use std::fmt::Display;

use thiserror::Error;

/// Main error type for all textwire operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value has a shape with no wire mapping.
    #[error("encoding error: {0}")]
    Encode(String),

    /// Malformed or mismatched token, or premature end of input.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Rejected method registration.
    #[error("register: {0}")]
    Registration(String),

    /// Error text returned by a remote handler.
    #[error("{0}")]
    Application(String),

    /// Framing violation (stray delimiter, oversized value).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No response after the retry was exhausted.
    #[error("can not receive response")]
    Timeout,

    /// The session ended; carries the terminal cause.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// `close` was called on a session that is already closing.
    #[error("the connection is already shut down")]
    AlreadyClosed,
}

impl RpcError {
    /// Build a decode error from any displayable cause.
    pub(crate) fn decode(msg: impl Display) -> Self {
        RpcError::Decode(msg.to_string())
    }

    /// Build an encoding error from any displayable cause.
    pub(crate) fn encode(msg: impl Display) -> Self {
        RpcError::Encode(msg.to_string())
    }

    /// True for errors that end a session or connection.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_)
                | RpcError::Protocol(_)
                | RpcError::ConnectionClosed(_)
                | RpcError::AlreadyClosed
        )
    }
}

impl serde::ser::Error for RpcError {
    fn custom<T: Display>(msg: T) -> Self {
        RpcError::encode(msg)
    }
}

impl serde::de::Error for RpcError {
    fn custom<T: Display>(msg: T) -> Self {
        RpcError::decode(msg)
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_texts() {
        assert_eq!(RpcError::Timeout.to_string(), "can not receive response");
        assert_eq!(
            RpcError::Decode("expected `]`".into()).to_string(),
            "decode failed: expected `]`"
        );
        assert_eq!(RpcError::Application("boom".into()).to_string(), "boom");
    }

    #[test]
    fn test_terminal_classification() {
        assert!(RpcError::AlreadyClosed.is_terminal());
        assert!(RpcError::ConnectionClosed("eof".into()).is_terminal());
        assert!(!RpcError::Timeout.is_terminal());
        assert!(!RpcError::Application("x".into()).is_terminal());
    }
}

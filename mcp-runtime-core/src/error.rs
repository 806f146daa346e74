//! Error types for session runtime operations

use thiserror::Error;

/// Boxed cause carried by errors that wrap a lower-level failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Runtime error type shared by every crate in the workspace
#[derive(Error, Debug)]
pub enum Error {
    // Connection errors
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Connection closed: {message}")]
    ConnectionClosed { message: String },

    #[error("Not connected: session {session_id} is {state}")]
    NotConnected { session_id: String, state: String },

    #[error("Already connected: session {session_id}")]
    AlreadyConnected { session_id: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Handshake failed for session {session_id}: {source}")]
    HandshakeFailed {
        session_id: String,
        #[source]
        source: Box<Error>,
    },

    // Protocol errors
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Server error {code}: {message}")]
    Server {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    // Capability lookups
    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Resource not found: {uri}")]
    ResourceNotFound { uri: String },

    #[error("Prompt not found: {name}")]
    PromptNotFound { name: String },

    // Session errors
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session expired: {session_id}")]
    SessionExpired { session_id: String },

    #[error("Maximum sessions reached: {max_sessions}")]
    MaxSessionsReached { max_sessions: usize },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Unsupported transport: {kind}")]
    UnsupportedTransport { kind: String },

    // Timeouts and cancellation
    #[error("Operation timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Request cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Create a connection failure without an underlying cause
    pub fn connection_failed<S: Into<String>>(message: S) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failure wrapping a lower-level error
    pub fn connection_failed_with<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::ConnectionFailed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a connection closed error
    pub fn connection_closed<S: Into<String>>(message: S) -> Self {
        Self::ConnectionClosed {
            message: message.into(),
        }
    }

    /// Create a transport error without an underlying cause
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error wrapping a lower-level error
    pub fn transport_with<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::Transport {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a timeout error for the named operation
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a cancellation error for the named operation
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a session not found error
    pub fn session_not_found<S: ToString>(session_id: S) -> Self {
        Self::SessionNotFound {
            session_id: session_id.to_string(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Check if this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Check if this error reports a missing tool, resource, prompt or session
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ToolNotFound { .. }
                | Error::ResourceNotFound { .. }
                | Error::PromptNotFound { .. }
                | Error::SessionNotFound { .. }
                | Error::MethodNotFound { .. }
        )
    }

    /// Check if the caller may reasonably retry the failed operation
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::ConnectionFailed { .. }
            | Error::ConnectionClosed { .. }
            | Error::Timeout { .. }
            | Error::Transport { .. }
            | Error::MaxSessionsReached { .. } => true,
            Error::HandshakeFailed { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Stable error kind code for logging and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            Error::ConnectionFailed { .. } => "connection_failed",
            Error::ConnectionClosed { .. } => "connection_closed",
            Error::NotConnected { .. } => "not_connected",
            Error::AlreadyConnected { .. } => "already_connected",
            Error::InvalidStateTransition { .. } => "invalid_state_transition",
            Error::HandshakeFailed { .. } => "handshake_failed",
            Error::InvalidRequest { .. } => "invalid_request",
            Error::InvalidResponse { .. } => "invalid_response",
            Error::MethodNotFound { .. } => "method_not_found",
            Error::InvalidParams { .. } => "invalid_params",
            Error::Server { .. } => "server_error",
            Error::ToolNotFound { .. } => "tool_not_found",
            Error::ResourceNotFound { .. } => "resource_not_found",
            Error::PromptNotFound { .. } => "prompt_not_found",
            Error::SessionNotFound { .. } => "session_not_found",
            Error::SessionExpired { .. } => "session_expired",
            Error::MaxSessionsReached { .. } => "max_sessions_reached",
            Error::Transport { .. } => "transport_error",
            Error::UnsupportedTransport { .. } => "unsupported_transport",
            Error::Timeout { .. } => "timeout",
            Error::Cancelled { .. } => "cancelled",
            Error::Serialization(_) => "serialization",
            Error::Configuration(_) => "configuration",
            Error::Internal(_) => "internal",
        }
    }
}

/// Convenience result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::timeout("initialize", 30_000).code(), "timeout");
        assert_eq!(
            Error::MaxSessionsReached { max_sessions: 3 }.code(),
            "max_sessions_reached"
        );
        assert_eq!(
            Error::UnsupportedTransport {
                kind: "sse".to_string()
            }
            .code(),
            "unsupported_transport"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::timeout("tools/call", 100).is_timeout());
        assert!(Error::cancelled("tools/call").is_cancelled());
        assert!(Error::session_not_found("abc").is_not_found());
        assert!(Error::ToolNotFound {
            name: "missing".to_string()
        }
        .is_not_found());
        assert!(!Error::timeout("ping", 10).is_not_found());

        assert!(Error::connection_failed("refused").is_recoverable());
        assert!(!Error::MethodNotFound {
            method: "x".to_string()
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_display_carries_budget() {
        let err = Error::timeout("initialize", 1500);
        let display = err.to_string();
        assert!(display.contains("initialize"));
        assert!(display.contains("1500ms"));
    }

    #[test]
    fn test_wrapped_cause_is_exposed() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = Error::transport_with("write failed", io);
        let source = err.source().expect("cause should be kept");
        assert!(source.to_string().contains("pipe closed"));

        let handshake = Error::HandshakeFailed {
            session_id: "s1".to_string(),
            source: Box::new(Error::timeout("initialize", 10)),
        };
        assert!(handshake.is_recoverable());
        assert!(handshake.source().is_some());
    }

    #[test]
    fn test_from_conversions() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert_eq!(err.code(), "serialization");

        let err: Error = anyhow::anyhow!("boom").into();
        assert_eq!(err.code(), "internal");
    }
}

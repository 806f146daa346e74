//! Transport boundary for MCP sessions
//!
//! The runtime never inspects wire bytes. A transport exposes open/close, a
//! request primitive that resolves with the response correlated by request
//! id, fire-and-forget notifications, and a one-time receiver for
//! server-initiated notifications. Concrete stdio/SSE/streamable-HTTP
//! transports are supplied by the embedding application through a
//! [`TransportConnector`].

use crate::{
    protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod memory;

pub use memory::{InMemoryConnector, InMemoryServer, InMemoryTransport, ServerHandle};

/// Transport kinds a session may be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Spawned local process speaking over stdin/stdout
    Stdio,
    /// Legacy HTTP POST + server-sent event stream
    Sse,
    /// Bidirectional streamable HTTP
    StreamableHttp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Sse => write!(f, "sse"),
            TransportKind::StreamableHttp => write!(f, "streamable_http"),
        }
    }
}

/// Transport configuration, discriminated by transport kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    /// Stdio configuration for a command with arguments
    pub fn stdio<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TransportConfig::Stdio {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    pub fn sse(url: impl Into<String>) -> Self {
        TransportConfig::Sse {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn streamable_http(url: impl Into<String>) -> Self {
        TransportConfig::StreamableHttp {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Sse { .. } => TransportKind::Sse,
            TransportConfig::StreamableHttp { .. } => TransportKind::StreamableHttp,
        }
    }

    /// Short human-readable target, used in log lines
    pub fn target(&self) -> &str {
        match self {
            TransportConfig::Stdio { command, .. } => command,
            TransportConfig::Sse { url, .. } | TransportConfig::StreamableHttp { url, .. } => url,
        }
    }
}

/// Transport trait for MCP communication
///
/// Methods take `&self` so that one transport can carry several in-flight
/// requests at once; implementations correlate responses by request id.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Kind of channel this transport speaks
    fn kind(&self) -> TransportKind;

    /// Establish the underlying channel
    async fn open(&self) -> Result<()>;

    /// Send a request and wait for the response carrying the same id
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; no response is expected
    async fn notify(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Take the receiver of server-initiated notifications.
    ///
    /// Returns `None` once the receiver has been taken.
    fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcNotification>>;

    /// Close the transport. Closing an already-closed transport is a no-op.
    async fn close(&self) -> Result<()>;

    /// Whether the channel is currently open
    fn is_open(&self) -> bool;
}

/// Builds transports from caller-supplied configuration
pub trait TransportConnector: Send + Sync {
    /// Create an unopened transport for `config`.
    ///
    /// Fails with [`Error::UnsupportedTransport`] for kinds the connector
    /// cannot build.
    fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>>;
}

/// Shorthand for rejecting a transport kind a connector does not handle
pub fn unsupported(kind: TransportKind) -> Error {
    Error::UnsupportedTransport {
        kind: kind.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transport_config_kinds() {
        assert_eq!(
            TransportConfig::stdio("node", ["server.js"]).kind(),
            TransportKind::Stdio
        );
        assert_eq!(
            TransportConfig::sse("http://localhost:3000/sse").kind(),
            TransportKind::Sse
        );
        assert_eq!(
            TransportConfig::streamable_http("http://localhost:3000/mcp").kind(),
            TransportKind::StreamableHttp
        );
    }

    #[test]
    fn test_transport_config_deserializes_tagged() {
        let config: TransportConfig = serde_json::from_value(json!({
            "type": "stdio",
            "command": "uvx",
            "args": ["chain-tools"]
        }))
        .unwrap();

        match &config {
            TransportConfig::Stdio { command, args, env, cwd } => {
                assert_eq!(command, "uvx");
                assert_eq!(args, &vec!["chain-tools".to_string()]);
                assert!(env.is_empty());
                assert!(cwd.is_none());
            }
            other => panic!("unexpected config: {:?}", other),
        }
        assert_eq!(config.target(), "uvx");

        let config: TransportConfig = serde_json::from_value(json!({
            "type": "streamable_http",
            "url": "https://tools.example.com/mcp"
        }))
        .unwrap();
        assert_eq!(config.kind().to_string(), "streamable_http");
    }

    #[test]
    fn test_unsupported_error() {
        let err = unsupported(TransportKind::Sse);
        assert_eq!(err.code(), "unsupported_transport");
        assert!(err.to_string().contains("sse"));
    }
}

//! Session lifecycle manager for MCP clients
//!
//! [`SessionManager`] creates, tracks and destroys client sessions against MCP
//! servers. Each session wraps an [`McpClient`] that runs the initialize
//! handshake over a pluggable transport, tracks connection state and issues
//! protocol requests. Lifecycle transitions and request outcomes are published
//! on an [`EventBus`](mcp_runtime_events::EventBus) and counted in the
//! monitoring registries.
//!
//! ```no_run
//! use mcp_runtime_core::{SessionManagerConfig, TransportConfig, TransportConnector};
//! use mcp_runtime_session::SessionManager;
//! use std::sync::Arc;
//!
//! # async fn run(connector: Arc<dyn TransportConnector>) -> mcp_runtime_core::Result<()> {
//! let manager = SessionManager::new(SessionManagerConfig::default(), connector);
//! let session = manager
//!     .create_session(TransportConfig::streamable_http("http://localhost:8080/mcp"))
//!     .await?;
//! let tools = manager.list_tools(session).await?;
//! println!("{} tools", tools.tools.len());
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod manager;

pub use client::{ActivityHook, ConnectionSnapshot, McpClient};
pub use config::{RuntimeConfig, ENV_PREFIX};
pub use manager::{SessionInfo, SessionManager, SessionManagerBuilder};

//! Core types for the MCP session runtime
//!
//! This crate holds everything the session lifecycle manager consumes at its
//! boundaries:
//!
//! - **[`error`]**: the runtime error taxonomy with stable kind codes
//! - **[`protocol`]**: JSON-RPC envelopes, handshake and capability types
//! - **[`state`]**: session ids and the connection state machine
//! - **[`transport`]**: the [`Transport`](transport::Transport) trait, transport
//!   configuration and an in-memory transport pair
//! - **[`config`]**: client and session manager options

pub mod config;
pub mod error;
pub mod protocol;
pub mod state;
pub mod transport;

pub use config::{CapacityPolicy, ClientConfig, SessionManagerConfig};
pub use error::{Error, Result};
pub use state::{ConnectionState, DestroyReason, SessionId};
pub use transport::{Transport, TransportConfig, TransportConnector, TransportKind};

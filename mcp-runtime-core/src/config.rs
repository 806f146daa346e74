//! Client and session manager configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-operation budgets used by the protocol client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Budget for opening the transport and completing the handshake
    pub connection_timeout_ms: u64,
    /// Budget for a single request awaiting its response
    pub request_timeout_ms: u64,
    /// Name reported to servers during the handshake
    pub client_name: String,
    /// Version reported to servers during the handshake
    pub client_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 30_000,
            request_timeout_ms: 60_000,
            client_name: "mcp-runtime".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ClientConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// What to do when a new session would exceed `max_sessions`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Fail the new session with `MaxSessionsReached`
    #[default]
    Reject,
    /// Destroy the least recently used session, then admit the new one
    EvictLeastRecentlyUsed,
}

/// Session manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionManagerConfig {
    /// Idle window after which a session is evicted
    pub session_timeout_ms: u64,
    /// Hard cap on concurrently open sessions
    pub max_sessions: usize,
    /// Verbose diagnostic logging
    pub debug: bool,
    pub capacity_policy: CapacityPolicy,
    /// Keep sessions whose handshake failed in the `error` state instead of
    /// destroying them
    pub retain_failed_sessions: bool,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 5 * 60 * 1000,
            max_sessions: 100,
            debug: false,
            capacity_policy: CapacityPolicy::Reject,
            retain_failed_sessions: false,
        }
    }
}

impl SessionManagerConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let session = SessionManagerConfig::default();
        assert_eq!(session.session_timeout(), Duration::from_secs(300));
        assert_eq!(session.max_sessions, 100);
        assert!(!session.debug);
        assert_eq!(session.capacity_policy, CapacityPolicy::Reject);

        let client = ClientConfig::default();
        assert_eq!(client.connection_timeout(), Duration::from_secs(30));
        assert_eq!(client.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_deserialization_keeps_defaults() {
        let config: SessionManagerConfig =
            serde_json::from_str(r#"{"max_sessions": 4, "capacity_policy": "evict_least_recently_used"}"#)
                .unwrap();
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.capacity_policy, CapacityPolicy::EvictLeastRecentlyUsed);
        assert_eq!(config.session_timeout_ms, 300_000);
    }
}

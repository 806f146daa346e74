//! Layered runtime configuration

use mcp_runtime_core::{ClientConfig, Result, SessionManagerConfig};
use mcp_runtime_events::EventBusConfig;
use mcp_runtime_monitoring::MonitoringConfig;
use serde::{Deserialize, Serialize};

/// Environment variable prefix, e.g. `MCP_RUNTIME__SESSION__MAX_SESSIONS`
pub const ENV_PREFIX: &str = "MCP_RUNTIME";

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub client: ClientConfig,
    pub session: SessionManagerConfig,
    pub events: EventBusConfig,
    pub monitoring: MonitoringConfig,
}

impl RuntimeConfig {
    /// Load configuration from config files and the environment.
    ///
    /// Sources, later ones overriding earlier: `config/default`,
    /// `config/local`, then `MCP_RUNTIME__*` variables with `__` separating
    /// nested keys.
    pub fn load() -> Result<Self> {
        Self::load_from("config/default", "config/local")
    }

    /// Load with explicit base and override file names (extension optional)
    pub fn load_from(default_file: &str, local_file: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(default_file).required(false))
            .add_source(config::File::with_name(local_file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: RuntimeConfig = settings.try_deserialize()?;
        if config.session.debug {
            config.monitoring.logging.debug = true;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_runtime_core::CapacityPolicy;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_load_defaults_without_sources() {
        let config = RuntimeConfig::load_from("does/not/exist", "does/not/exist/either").unwrap();

        assert_eq!(config.session.max_sessions, 100);
        assert_eq!(config.session.session_timeout_ms, 300_000);
        assert_eq!(config.client.request_timeout_ms, 60_000);
        assert_eq!(config.events.max_listeners, 100);
        assert_eq!(config.session.capacity_policy, CapacityPolicy::Reject);
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        std::env::set_var("MCP_RUNTIME__SESSION__MAX_SESSIONS", "3");
        std::env::set_var("MCP_RUNTIME__SESSION__DEBUG", "true");
        std::env::set_var("MCP_RUNTIME__SESSION__CAPACITY_POLICY", "evict_least_recently_used");

        let config = RuntimeConfig::load_from("does/not/exist", "does/not/exist/either");

        std::env::remove_var("MCP_RUNTIME__SESSION__MAX_SESSIONS");
        std::env::remove_var("MCP_RUNTIME__SESSION__DEBUG");
        std::env::remove_var("MCP_RUNTIME__SESSION__CAPACITY_POLICY");

        let config = config.unwrap();
        assert_eq!(config.session.max_sessions, 3);
        assert_eq!(config.session.capacity_policy, CapacityPolicy::EvictLeastRecentlyUsed);
        assert!(config.monitoring.logging.debug);
    }
}

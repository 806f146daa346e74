//! Manager wiring from a loaded runtime configuration. Kept in its own test
//! binary because it initializes the process-wide metric families.

use mcp_runtime_core::transport::InMemoryConnector;
use mcp_runtime_core::{CapacityPolicy, ClientConfig, SessionManagerConfig};
use mcp_runtime_events::EventBusConfig;
use mcp_runtime_monitoring::{GlobalMetrics, MetricsConfig, MonitoringConfig};
use mcp_runtime_session::{RuntimeConfig, SessionManager};
use std::sync::Arc;

#[tokio::test]
async fn test_manager_from_runtime_config() {
    let runtime = RuntimeConfig {
        client: ClientConfig {
            client_name: "wired".to_string(),
            connection_timeout_ms: 1500,
            ..ClientConfig::default()
        },
        session: SessionManagerConfig {
            max_sessions: 3,
            capacity_policy: CapacityPolicy::EvictLeastRecentlyUsed,
            ..SessionManagerConfig::default()
        },
        events: EventBusConfig { max_listeners: 7 },
        monitoring: MonitoringConfig {
            metrics: MetricsConfig {
                reservoir_size: 32,
                ..MetricsConfig::default()
            },
            ..MonitoringConfig::default()
        },
    };
    let connector = Arc::new(InMemoryConnector::new(|_, _| Ok(())));
    let manager = SessionManager::from_config(&runtime, connector);

    assert_eq!(manager.config(), &runtime.session);
    assert_eq!(manager.client_config(), &runtime.client);
    assert_eq!(manager.events().config().max_listeners, 7);
    assert_eq!(manager.metrics().session_lifetime.histogram().capacity(), 32);
    assert!(Arc::ptr_eq(manager.metrics(), &GlobalMetrics::global().session()));
    assert_eq!(GlobalMetrics::global().config().reservoir_size, 32);
}

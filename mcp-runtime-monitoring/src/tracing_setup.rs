//! Logging setup

use crate::{config::LoggingConfig, error::Result, MonitoringError};
use tracing::info;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Installs the global `tracing` subscriber
pub struct TracingSetup {
    config: LoggingConfig,
}

impl TracingSetup {
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    /// Filter directive used when `RUST_LOG` is unset
    pub fn default_directive(&self) -> &str {
        if self.config.debug {
            "debug"
        } else {
            &self.config.level
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }

    /// Install the subscriber. Fails if one is already installed.
    pub fn initialize(&self) -> Result<()> {
        let registry = Registry::default().with(self.env_filter());

        if self.config.json {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true);

            registry.with(json_layer).try_init().map_err(|e| {
                MonitoringError::Tracing(format!("Failed to init subscriber: {}", e))
            })?;
        } else {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_span_events(FmtSpan::CLOSE);

            registry.with(fmt_layer).try_init().map_err(|e| {
                MonitoringError::Tracing(format!("Failed to init subscriber: {}", e))
            })?;
        }

        info!(
            "Logging initialized (filter: {}, json: {})",
            self.default_directive(),
            self.config.json
        );
        Ok(())
    }
}

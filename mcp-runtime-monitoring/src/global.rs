//! Process-wide default metric families
//!
//! Components take their metric families as constructor arguments; this
//! module only supplies the default instance used at the outermost entry
//! point. Tests should build their own [`GlobalMetrics`] or call
//! [`GlobalMetrics::reset`] between cases.

use crate::bundles::{ClientMetrics, SessionMetrics};
use crate::config::MetricsConfig;
use crate::registry::RegistrySnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::warn;

static GLOBAL: OnceLock<GlobalMetrics> = OnceLock::new();

/// Combined snapshot across every metric family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSnapshot {
    pub timestamp: DateTime<Utc>,
    pub client: RegistrySnapshot,
    pub session: RegistrySnapshot,
}

/// Lazily constructed metric families, one cached instance each
#[derive(Debug)]
pub struct GlobalMetrics {
    config: MetricsConfig,
    client: OnceLock<Arc<ClientMetrics>>,
    session: OnceLock<Arc<SessionMetrics>>,
}

impl Default for GlobalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalMetrics {
    pub fn new() -> Self {
        Self::with_config(&MetricsConfig::default())
    }

    /// Families built from `config`, e.g. with a custom reservoir size
    pub fn with_config(config: &MetricsConfig) -> Self {
        Self {
            config: config.clone(),
            client: OnceLock::new(),
            session: OnceLock::new(),
        }
    }

    /// The process-wide instance, created on first access
    pub fn global() -> &'static GlobalMetrics {
        GLOBAL.get_or_init(GlobalMetrics::new)
    }

    /// Create the process-wide instance from `config`. Returns the existing
    /// instance unchanged if it was already created.
    pub fn init(config: &MetricsConfig) -> &'static GlobalMetrics {
        let global = GLOBAL.get_or_init(|| GlobalMetrics::with_config(config));
        if global.config.reservoir_size != config.reservoir_size {
            warn!(
                "Process-wide metrics already initialized with reservoir size {}; ignoring {}",
                global.config.reservoir_size, config.reservoir_size
            );
        }
        global
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn client(&self) -> Arc<ClientMetrics> {
        self.client
            .get_or_init(|| Arc::new(ClientMetrics::from_config(&self.config)))
            .clone()
    }

    pub fn session(&self) -> Arc<SessionMetrics> {
        self.session
            .get_or_init(|| Arc::new(SessionMetrics::from_config(&self.config)))
            .clone()
    }

    pub fn snapshot(&self) -> GlobalSnapshot {
        GlobalSnapshot {
            timestamp: Utc::now(),
            client: self.client().snapshot(),
            session: self.session().snapshot(),
        }
    }

    pub fn reset(&self) {
        if let Some(client) = self.client.get() {
            client.reset();
        }
        if let Some(session) = self.session.get() {
            session.reset();
        }
    }
}

//! Session lifecycle manager
//!
//! Owns every session from admission to destruction: enforces the session
//! cap, drives the handshake through [`McpClient`], runs one idle timer per
//! session and mirrors every transition into events and metrics.

use crate::client::McpClient;
use crate::config::RuntimeConfig;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use mcp_runtime_core::{
    protocol::{
        CallToolResult, GetPromptResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
        PeerInfo, PromptArguments, ReadResourceResult, ServerCapabilities,
    },
    CapacityPolicy, ClientConfig, ConnectionState, DestroyReason, Error, Result,
    SessionId, SessionManagerConfig, TransportConfig, TransportConnector, TransportKind,
};
use mcp_runtime_events::{EventBus, EventPayload, Subscription};
use mcp_runtime_monitoring::{ClientMetrics, GlobalMetrics, SessionMetrics};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read-only view of a managed session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub transport: TransportConfig,
    pub state: ConnectionState,
    pub server_info: Option<PeerInfo>,
    pub capabilities: Option<ServerCapabilities>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }
}

struct ActivityState {
    generation: u64,
    timer: Option<JoinHandle<()>>,
    last_used_at: DateTime<Utc>,
    last_used: Instant,
    closed: bool,
}

/// Last-use bookkeeping and the idle timer of one session
struct SessionActivity {
    session_id: SessionId,
    timeout: Duration,
    manager: Weak<ManagerInner>,
    state: Mutex<ActivityState>,
}

impl SessionActivity {
    fn new(session_id: SessionId, timeout: Duration, manager: Weak<ManagerInner>) -> Self {
        Self {
            session_id,
            timeout,
            manager,
            state: Mutex::new(ActivityState {
                generation: 0,
                timer: None,
                last_used_at: Utc::now(),
                last_used: Instant::now(),
                closed: false,
            }),
        }
    }

    /// Record activity and restart the idle timer
    fn touch(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.last_used_at = Utc::now();
        state.last_used = Instant::now();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;

        let generation = state.generation;
        let session_id = self.session_id;
        let timeout = self.timeout;
        let manager = self.manager.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(manager) = manager.upgrade() {
                manager.expire(session_id, generation).await;
            }
        }));
    }

    /// Claim the timer that fired for `generation`. The handle is released
    /// without aborting, since the claiming task is the timer itself.
    fn claim_expiry(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.generation != generation {
            return false;
        }
        state.timer.take();
        true
    }

    /// Stop the idle timer for good
    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    fn last_used(&self) -> (DateTime<Utc>, Instant) {
        let state = self.state.lock();
        (state.last_used_at, state.last_used)
    }
}

struct SessionEntry {
    client: Arc<McpClient>,
    config: TransportConfig,
    activity: Arc<SessionActivity>,
    created_at: DateTime<Utc>,
    created: Instant,
}

impl SessionEntry {
    fn info(&self) -> SessionInfo {
        let connection = self.client.snapshot();
        SessionInfo {
            id: self.client.session_id(),
            transport: self.config.clone(),
            state: connection.state,
            server_info: connection.server_info,
            capabilities: connection.capabilities,
            created_at: self.created_at,
            last_used_at: self.activity.last_used().0,
        }
    }
}

struct ManagerInner {
    config: SessionManagerConfig,
    client_config: ClientConfig,
    connector: Arc<dyn TransportConnector>,
    events: EventBus,
    metrics: Arc<SessionMetrics>,
    client_metrics: Arc<ClientMetrics>,
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    debug_subscription: Option<Subscription>,
}

impl ManagerInner {
    /// Idle timer callback
    async fn expire(&self, session_id: SessionId, generation: u64) {
        let entry = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(&session_id) {
                Some(entry) if entry.activity.claim_expiry(generation) => {
                    sessions.remove(&session_id)
                }
                _ => None,
            }
        };
        if let Some(entry) = entry {
            info!("Session {} idle for {:?}, evicting", session_id, entry.activity.timeout);
            self.finish_destroy(session_id, entry, DestroyReason::Timeout)
                .await;
        }
    }

    /// Tear down an entry that has already left the session map
    async fn finish_destroy(&self, session_id: SessionId, entry: SessionEntry, reason: DestroyReason) {
        entry.activity.close();
        if let Err(e) = entry.client.close().await {
            warn!("Error closing session {}: {}", session_id, e);
        }

        let lifetime = entry.created.elapsed();
        self.metrics.sessions_active.decrement(1.0);
        self.metrics.sessions_destroyed.increment();
        match reason {
            DestroyReason::Evicted => self.metrics.sessions_evicted.increment(),
            DestroyReason::Timeout => self.metrics.sessions_timed_out.increment(),
            _ => {}
        }
        self.metrics.session_lifetime.record(lifetime);

        info!("Session {} destroyed ({})", session_id, reason);
        self.events.emit(EventPayload::session_destroyed(
            session_id,
            entry.config.kind(),
            reason,
            lifetime,
        ));
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(subscription) = &self.debug_subscription {
            subscription.unsubscribe();
        }
        for entry in self.sessions.get_mut().values() {
            entry.activity.close();
        }
    }
}

/// Builder for [`SessionManager`]
pub struct SessionManagerBuilder {
    connector: Arc<dyn TransportConnector>,
    config: SessionManagerConfig,
    client_config: ClientConfig,
    events: Option<EventBus>,
    metrics: Option<Arc<SessionMetrics>>,
    client_metrics: Option<Arc<ClientMetrics>>,
}

impl SessionManagerBuilder {
    /// Builder preloaded from `runtime`; later calls still override
    pub fn from_config(runtime: &RuntimeConfig, connector: Arc<dyn TransportConnector>) -> Self {
        let metrics = GlobalMetrics::init(&runtime.monitoring.metrics);
        SessionManager::builder(connector)
            .config(runtime.session.clone())
            .client_config(runtime.client.clone())
            .events(EventBus::with_config(runtime.events.clone()))
            .metrics(metrics.session(), metrics.client())
    }

    pub fn config(mut self, config: SessionManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client_config(mut self, client_config: ClientConfig) -> Self {
        self.client_config = client_config;
        self
    }

    /// Publish through an existing bus instead of a private one
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Use explicit metric families instead of the process-wide defaults
    pub fn metrics(mut self, metrics: Arc<SessionMetrics>, client_metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self.client_metrics = Some(client_metrics);
        self
    }

    pub fn build(self) -> SessionManager {
        let events = self.events.unwrap_or_default();
        let metrics = self
            .metrics
            .unwrap_or_else(|| GlobalMetrics::global().session());
        let client_metrics = self
            .client_metrics
            .unwrap_or_else(|| GlobalMetrics::global().client());

        let debug_subscription = self.config.debug.then(|| {
            events.on_any(|event| {
                info!(
                    "[session {}] {}",
                    event.session_id(),
                    serde_json::to_string(event.data()).unwrap_or_default()
                )
            })
        });

        info!(
            "Session manager started (max sessions: {}, idle timeout: {}ms, policy: {:?})",
            self.config.max_sessions, self.config.session_timeout_ms, self.config.capacity_policy
        );

        SessionManager {
            inner: Arc::new(ManagerInner {
                config: self.config,
                client_config: self.client_config,
                connector: self.connector,
                events,
                metrics,
                client_metrics,
                sessions: RwLock::new(HashMap::new()),
                debug_subscription,
            }),
        }
    }
}

/// Session lifecycle manager
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Manager with a private event bus and the process-wide metric families
    pub fn new(config: SessionManagerConfig, connector: Arc<dyn TransportConnector>) -> Self {
        Self::builder(connector).config(config).build()
    }

    /// Manager wired from a loaded [`RuntimeConfig`]: session and client
    /// settings, an event bus with the configured listener cap, and the
    /// process-wide metric families sized by `monitoring.metrics`
    pub fn from_config(
        runtime: &RuntimeConfig,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        SessionManagerBuilder::from_config(runtime, connector).build()
    }

    pub fn builder(connector: Arc<dyn TransportConnector>) -> SessionManagerBuilder {
        SessionManagerBuilder {
            connector,
            config: SessionManagerConfig::default(),
            client_config: ClientConfig::default(),
            events: None,
            metrics: None,
            client_metrics: None,
        }
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.inner.config
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.inner.client_config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.inner.metrics
    }

    pub fn client_metrics(&self) -> &Arc<ClientMetrics> {
        &self.inner.client_metrics
    }

    /// Admit a new session, connect it and start its idle timer.
    ///
    /// Fails with [`Error::MaxSessionsReached`] when the cap is hit under
    /// [`CapacityPolicy::Reject`], and with [`Error::HandshakeFailed`] when
    /// the transport or handshake fails.
    pub async fn create_session(&self, config: TransportConfig) -> Result<SessionId> {
        let inner = &self.inner;
        let session_id = SessionId::new();
        let transport = inner.connector.create(&config)?;
        let kind = transport.kind();

        let activity = Arc::new(SessionActivity::new(
            session_id,
            inner.config.session_timeout(),
            Arc::downgrade(inner),
        ));
        let hook_activity = activity.clone();
        let client = Arc::new(
            McpClient::new(
                session_id,
                transport,
                inner.client_config.clone(),
                inner.events.clone(),
                inner.client_metrics.clone(),
            )
            .with_activity_hook(Arc::new(move || hook_activity.touch())),
        );

        let evicted = {
            let mut sessions = inner.sessions.write().await;
            let mut evicted = None;
            if sessions.len() >= inner.config.max_sessions {
                match inner.config.capacity_policy {
                    CapacityPolicy::Reject => {
                        debug!(
                            "Rejecting session for {}: {} sessions open",
                            config.target(),
                            sessions.len()
                        );
                        return Err(Error::MaxSessionsReached {
                            max_sessions: inner.config.max_sessions,
                        });
                    }
                    CapacityPolicy::EvictLeastRecentlyUsed => {
                        let oldest = sessions
                            .iter()
                            .min_by_key(|(_, entry)| entry.activity.last_used().1)
                            .map(|(id, _)| *id);
                        evicted = oldest.and_then(|id| sessions.remove(&id).map(|e| (id, e)));
                        if evicted.is_none() {
                            return Err(Error::MaxSessionsReached {
                                max_sessions: inner.config.max_sessions,
                            });
                        }
                    }
                }
            }
            sessions.insert(
                session_id,
                SessionEntry {
                    client: client.clone(),
                    config: config.clone(),
                    activity: activity.clone(),
                    created_at: Utc::now(),
                    created: Instant::now(),
                },
            );
            inner.metrics.sessions_active.increment(1.0);
            evicted
        };

        if let Some((victim, entry)) = evicted {
            info!("Evicting least recently used session {}", victim);
            inner
                .finish_destroy(victim, entry, DestroyReason::Evicted)
                .await;
        }

        inner.metrics.sessions_created.increment();
        info!("Session {} created for {} ({})", session_id, config.target(), kind);
        inner
            .events
            .emit(EventPayload::session_created(session_id, kind));

        match client.connect().await {
            Ok(_) => {
                activity.touch();
                Ok(session_id)
            }
            Err(error) => {
                inner.metrics.connection_failures.increment();
                if inner.config.retain_failed_sessions {
                    activity.touch();
                    warn!(
                        "Session {} handshake failed, retained in error state: {}",
                        session_id, error
                    );
                } else if let Err(e) = self.destroy_session(session_id, DestroyReason::Error).await
                {
                    debug!("Failed session {} was already gone: {}", session_id, e);
                }
                Err(Error::HandshakeFailed {
                    session_id: session_id.to_string(),
                    source: Box::new(error),
                })
            }
        }
    }

    /// Close and remove a session
    pub async fn destroy_session(&self, session_id: SessionId, reason: DestroyReason) -> Result<()> {
        let entry = self
            .inner
            .sessions
            .write()
            .await
            .remove(&session_id)
            .ok_or_else(|| Error::session_not_found(session_id))?;
        self.inner.finish_destroy(session_id, entry, reason).await;
        Ok(())
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<SessionInfo> {
        self.inner
            .sessions
            .read()
            .await
            .get(&session_id)
            .map(SessionEntry::info)
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    /// Sessions ordered by creation time
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .map(SessionEntry::info)
            .collect();
        sessions.sort_by_key(|info| info.created_at);
        sessions
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Client of a session, for operations not wrapped by the manager.
    /// Requests through it still count as session activity.
    pub async fn client(&self, session_id: SessionId) -> Result<Arc<McpClient>> {
        self.inner
            .sessions
            .read()
            .await
            .get(&session_id)
            .map(|entry| entry.client.clone())
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    /// Mark a session as active, restarting its idle timer
    pub async fn touch(&self, session_id: SessionId) -> Result<()> {
        let sessions = self.inner.sessions.read().await;
        let entry = sessions
            .get(&session_id)
            .ok_or_else(|| Error::session_not_found(session_id))?;
        entry.activity.touch();
        Ok(())
    }

    /// Reconnect a session that is in the `error` or `disconnected` state
    /// with a freshly built transport
    pub async fn reconnect(&self, session_id: SessionId) -> Result<()> {
        let (client, config, activity) = {
            let sessions = self.inner.sessions.read().await;
            let entry = sessions
                .get(&session_id)
                .ok_or_else(|| Error::session_not_found(session_id))?;
            (
                entry.client.clone(),
                entry.config.clone(),
                entry.activity.clone(),
            )
        };
        if client.state().is_connected() {
            return Err(Error::AlreadyConnected {
                session_id: session_id.to_string(),
            });
        }

        let transport = self.inner.connector.create(&config)?;
        activity.touch();
        match client.reconnect(transport).await {
            Ok(_) => {
                activity.touch();
                info!("Session {} reconnected", session_id);
                Ok(())
            }
            Err(error) => {
                self.inner.metrics.connection_failures.increment();
                Err(Error::HandshakeFailed {
                    session_id: session_id.to_string(),
                    source: Box::new(error),
                })
            }
        }
    }

    /// Destroy every session with reason `shutdown`
    pub async fn shutdown(&self) {
        let drained: Vec<(SessionId, SessionEntry)> =
            self.inner.sessions.write().await.drain().collect();
        info!("Shutting down session manager ({} sessions)", drained.len());
        join_all(drained.into_iter().map(|(session_id, entry)| {
            self.inner
                .finish_destroy(session_id, entry, DestroyReason::Shutdown)
        }))
        .await;
    }

    pub async fn ping(&self, session_id: SessionId) -> Result<()> {
        self.client(session_id).await?.ping().await
    }

    pub async fn list_tools(&self, session_id: SessionId) -> Result<ListToolsResult> {
        self.client(session_id).await?.list_tools().await
    }

    pub async fn call_tool(
        &self,
        session_id: SessionId,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult> {
        self.client(session_id).await?.call_tool(name, arguments).await
    }

    pub async fn call_tool_with_cancel(
        &self,
        session_id: SessionId,
        name: &str,
        arguments: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult> {
        self.client(session_id)
            .await?
            .call_tool_with_cancel(name, arguments, cancel)
            .await
    }

    pub async fn list_resources(&self, session_id: SessionId) -> Result<ListResourcesResult> {
        self.client(session_id).await?.list_resources().await
    }

    pub async fn read_resource(&self, session_id: SessionId, uri: &str) -> Result<ReadResourceResult> {
        self.client(session_id).await?.read_resource(uri).await
    }

    pub async fn list_prompts(&self, session_id: SessionId) -> Result<ListPromptsResult> {
        self.client(session_id).await?.list_prompts().await
    }

    pub async fn get_prompt(
        &self,
        session_id: SessionId,
        name: &str,
        arguments: Option<PromptArguments>,
    ) -> Result<GetPromptResult> {
        self.client(session_id).await?.get_prompt(name, arguments).await
    }
}

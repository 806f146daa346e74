//! Protocol client for a single session
//!
//! [`McpClient`] drives one transport through the connection state machine,
//! performs the initialize handshake and wraps every request with events and
//! metrics. Each request publishes `request:start` followed by exactly one
//! of `request:complete`, `request:error` or `request:cancelled`.

use mcp_runtime_core::{
    protocol::{
        methods, CallToolResult, ClientCapabilities, GetPromptResult, InitializeParams,
        InitializeResult, JsonRpcNotification, JsonRpcRequest, ListPromptsResult,
        ListResourcesResult, ListToolsResult, LoggingMessage, PeerInfo, PromptArguments,
        ReadResourceResult, ServerCapabilities, MCP_VERSION,
    },
    ClientConfig, ConnectionState, Error, Result, SessionId, Transport, TransportKind,
};
use mcp_runtime_events::{EventBus, EventPayload};
use mcp_runtime_monitoring::{ClientMetrics, RequestOutcome};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callback invoked whenever the session sees traffic
pub type ActivityHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ClientState {
    connection: ConnectionState,
    server_info: Option<PeerInfo>,
    capabilities: Option<ServerCapabilities>,
    instructions: Option<String>,
}

impl ClientState {
    fn clear_peer(&mut self) {
        self.server_info = None;
        self.capabilities = None;
        self.instructions = None;
    }
}

/// Consistent view of a client's connection; peer details are present
/// exactly when `state` is connected
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub server_info: Option<PeerInfo>,
    pub capabilities: Option<ServerCapabilities>,
}

/// MCP client bound to one session
pub struct McpClient {
    session_id: SessionId,
    config: ClientConfig,
    transport: Mutex<Arc<dyn Transport>>,
    events: EventBus,
    metrics: Arc<ClientMetrics>,
    state: Mutex<ClientState>,
    next_request_id: AtomicU64,
    reconnect_attempts: AtomicU32,
    notification_task: Mutex<Option<JoinHandle<()>>>,
    on_activity: Option<ActivityHook>,
}

impl McpClient {
    pub fn new(
        session_id: SessionId,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        events: EventBus,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self {
            session_id,
            config,
            transport: Mutex::new(transport),
            events,
            metrics,
            state: Mutex::new(ClientState::default()),
            next_request_id: AtomicU64::new(1),
            reconnect_attempts: AtomicU32::new(0),
            notification_task: Mutex::new(None),
            on_activity: None,
        }
    }

    /// Call `hook` on every request sent and every message received
    pub fn with_activity_hook(mut self, hook: ActivityHook) -> Self {
        self.on_activity = Some(hook);
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.lock().kind()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Peer name and version; present only while connected
    pub fn server_info(&self) -> Option<PeerInfo> {
        self.state.lock().server_info.clone()
    }

    /// Negotiated capabilities; present only while connected
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.state.lock().capabilities.clone()
    }

    pub fn instructions(&self) -> Option<String> {
        self.state.lock().instructions.clone()
    }

    /// State and peer details read under one lock
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.state.lock();
        ConnectionSnapshot {
            state: state.connection,
            server_info: state.server_info.clone(),
            capabilities: state.capabilities.clone(),
        }
    }

    fn current_transport(&self) -> Arc<dyn Transport> {
        self.transport.lock().clone()
    }

    fn mark_active(&self) {
        if let Some(hook) = &self.on_activity {
            hook();
        }
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Move to `next`. Entering `connected` stores the negotiated peer
    /// details in the same critical section; any other state clears them.
    fn transition(
        &self,
        next: ConnectionState,
        established: Option<&InitializeResult>,
    ) -> Result<ConnectionState> {
        let previous = {
            let mut state = self.state.lock();
            let previous = state.connection;
            state.connection = previous.transition(next)?;
            match established.filter(|_| next == ConnectionState::Connected) {
                Some(result) => {
                    state.server_info = Some(result.server_info.clone());
                    state.capabilities = Some(result.capabilities.clone());
                    state.instructions = result.instructions.clone();
                }
                None => state.clear_peer(),
            }
            previous
        };
        self.publish_transition(previous, next);
        Ok(previous)
    }

    fn publish_transition(&self, previous: ConnectionState, next: ConnectionState) {
        debug!(
            "Session {} connection {} -> {}",
            self.session_id, previous, next
        );
        self.events.emit(EventPayload::connection_state_changed(
            self.session_id,
            self.transport_kind(),
            previous,
            next,
        ));
    }

    /// Claim the `connecting` state and optionally swap the transport.
    /// The state check, the claim and the swap happen under the state lock,
    /// so of two racing callers exactly one proceeds.
    fn begin_connect(
        &self,
        replacement: Option<Arc<dyn Transport>>,
    ) -> Result<(ConnectionState, Arc<dyn Transport>)> {
        let mut state = self.state.lock();
        let previous = state.connection;
        if !previous.can_transition_to(ConnectionState::Connecting) {
            return Err(Error::AlreadyConnected {
                session_id: self.session_id.to_string(),
            });
        }
        state.connection = ConnectionState::Connecting;
        state.clear_peer();

        let mut transport = self.transport.lock();
        if let Some(replacement) = replacement {
            *transport = replacement;
        }
        Ok((previous, transport.clone()))
    }

    /// Open the transport and run the initialize handshake.
    ///
    /// On failure the transport is closed, `connection:error` is published
    /// and the client is left in the `error` state. A concurrent
    /// [`close`](Self::close) wins over the handshake: the client stays
    /// `disconnected` and the error is a cancellation.
    pub async fn connect(&self) -> Result<InitializeResult> {
        let (previous, transport) = self.begin_connect(None)?;
        self.run_handshake(previous, transport).await
    }

    /// Swap in a fresh transport and connect again from the `error` or
    /// `disconnected` state
    pub async fn reconnect(&self, transport: Arc<dyn Transport>) -> Result<InitializeResult> {
        let (previous, transport) = self.begin_connect(Some(transport))?;
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.metrics.connection.reconnect_attempts.increment();
        self.events.emit(EventPayload::connection_reconnecting(
            self.session_id,
            transport.kind(),
            attempt,
        ));
        info!(
            "Session {} reconnecting (attempt {})",
            self.session_id, attempt
        );
        self.run_handshake(previous, transport).await
    }

    async fn run_handshake(
        &self,
        previous: ConnectionState,
        transport: Arc<dyn Transport>,
    ) -> Result<InitializeResult> {
        self.publish_transition(previous, ConnectionState::Connecting);
        let kind = transport.kind();
        self.metrics.connection.attempts.increment();
        let started = Instant::now();
        let budget = self.config.connection_timeout();

        let outcome = match tokio::time::timeout(budget, self.handshake(&transport)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                methods::INITIALIZE,
                self.config.connection_timeout_ms,
            )),
        };
        let outcome = outcome.and_then(|result| {
            self.transition(ConnectionState::Connected, Some(&result))
                .map(|_| result)
                .map_err(|_| Error::cancelled(methods::INITIALIZE))
        });

        match outcome {
            Ok(result) => {
                self.metrics.connection.record_success(started.elapsed());
                self.reconnect_attempts.store(0, Ordering::Relaxed);
                self.spawn_notification_pump(&transport);
                if !self.is_connected() {
                    // closed between the transition and the spawn
                    if let Some(task) = self.notification_task.lock().take() {
                        task.abort();
                    }
                }
                info!(
                    "Session {} connected to {} {} over {}",
                    self.session_id, result.server_info.name, result.server_info.version, kind
                );
                self.events
                    .emit(EventPayload::connection_established(self.session_id, kind));
                Ok(result)
            }
            Err(error) => {
                if let Err(close_error) = transport.close().await {
                    warn!(
                        "Failed to close transport for session {}: {}",
                        self.session_id, close_error
                    );
                }
                self.metrics.connection.record_failure(started.elapsed());
                let error = match self.transition(ConnectionState::Error, None) {
                    Ok(_) => error,
                    Err(_) => Error::cancelled(methods::INITIALIZE),
                };
                warn!("Session {} handshake failed: {}", self.session_id, error);
                self.events.emit(EventPayload::connection_error(
                    self.session_id,
                    kind,
                    &error,
                ));
                Err(error)
            }
        }
    }

    async fn handshake(&self, transport: &Arc<dyn Transport>) -> Result<InitializeResult> {
        transport.open().await?;

        let params = InitializeParams {
            protocol_version: MCP_VERSION.to_string(),
            client_info: PeerInfo::new(&self.config.client_name, &self.config.client_version),
            capabilities: ClientCapabilities::default(),
        };
        let params = serde_json::to_value(params)?;
        let response = transport
            .request(JsonRpcRequest::new(
                self.next_id(),
                methods::INITIALIZE,
                Some(params.clone()),
            ))
            .await?;
        let result: InitializeResult = serde_json::from_value(
            response.into_result(methods::INITIALIZE, Some(&params))?,
        )
        .map_err(|e| Error::invalid_response(format!("malformed initialize result: {}", e)))?;

        transport
            .notify(JsonRpcNotification::new(methods::INITIALIZED, None))
            .await?;
        Ok(result)
    }

    fn spawn_notification_pump(&self, transport: &Arc<dyn Transport>) {
        let Some(receiver) = transport.take_notifications() else {
            return;
        };
        let session_id = self.session_id;
        let events = self.events.clone();
        let metrics = self.metrics.clone();
        let on_activity = self.on_activity.clone();

        let task = tokio::spawn(pump_notifications(
            session_id,
            receiver,
            events,
            metrics,
            on_activity,
        ));
        if let Some(previous) = self.notification_task.lock().replace(task) {
            previous.abort();
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        let state = self.state();
        if state.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected {
                session_id: self.session_id.to_string(),
                state: state.to_string(),
            })
        }
    }

    async fn send_cancellation(&self, transport: &Arc<dyn Transport>, id: u64, reason: &str) {
        let notification = JsonRpcNotification::new(
            methods::CANCELLED,
            Some(json!({ "requestId": id, "reason": reason })),
        );
        if let Err(e) = transport.notify(notification).await {
            debug!("Could not notify server of cancelled request {}: {}", id, e);
        }
    }

    /// Issue one request with the per-request timeout, an optional
    /// cancellation token and full event/metric bookkeeping
    async fn execute<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        tool: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<T> {
        self.ensure_connected()?;
        let transport = self.current_transport();
        let id = self.next_id();
        let request_id = id.to_string();
        let requests = &self.metrics.requests;

        self.mark_active();
        requests.record_start(method);
        match method {
            methods::READ_RESOURCE => requests.resource_reads.increment(),
            methods::GET_PROMPT => requests.prompt_gets.increment(),
            _ => {}
        }
        self.events.emit(EventPayload::request_started(
            self.session_id,
            &request_id,
            method,
        ));
        if let Some(name) = tool {
            requests.tool_calls.increment();
            self.events
                .emit(EventPayload::tool_started(self.session_id, &request_id, name));
        }

        let started = Instant::now();
        let call = async {
            let response = transport
                .request(JsonRpcRequest::new(id, method, params.clone()))
                .await?;
            response.into_result(method, params.as_ref())
        };
        let budget = self.config.request_timeout();
        let timed = async {
            tokio::time::timeout(budget, call)
                .await
                .unwrap_or_else(|_| Err(Error::timeout(method, self.config.request_timeout_ms)))
        };
        let outcome = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::cancelled(method)),
                result = timed => result,
            },
            None => timed.await,
        };

        let outcome = outcome.and_then(|value| {
            let tool_reported_error = value
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            serde_json::from_value::<T>(value)
                .map(|decoded| (decoded, tool_reported_error))
                .map_err(|e| {
                    Error::invalid_response(format!("malformed '{}' result: {}", method, e))
                })
        });
        let elapsed = started.elapsed();
        self.mark_active();

        match outcome {
            Ok((decoded, tool_reported_error)) => {
                requests.record_outcome(RequestOutcome::Completed, elapsed);
                if let Some(name) = tool {
                    requests.tool_duration.record(elapsed);
                    if tool_reported_error {
                        requests.tool_errors.increment();
                    }
                    self.events.emit(EventPayload::tool_completed(
                        self.session_id,
                        &request_id,
                        name,
                        elapsed,
                        tool_reported_error,
                    ));
                }
                debug!(
                    "Session {} request {} ({}) completed in {:?}",
                    self.session_id, request_id, method, elapsed
                );
                self.events.emit(EventPayload::request_completed(
                    self.session_id,
                    &request_id,
                    method,
                    elapsed,
                ));
                Ok(decoded)
            }
            Err(error) => {
                if let Some(name) = tool {
                    requests.tool_duration.record(elapsed);
                    requests.tool_errors.increment();
                    self.events.emit(EventPayload::tool_failed(
                        self.session_id,
                        &request_id,
                        name,
                        elapsed,
                        &error,
                    ));
                }
                if error.is_cancelled() {
                    requests.record_outcome(RequestOutcome::Cancelled, elapsed);
                    self.send_cancellation(&transport, id, "cancelled by caller")
                        .await;
                    debug!(
                        "Session {} request {} ({}) cancelled",
                        self.session_id, request_id, method
                    );
                    self.events.emit(EventPayload::request_cancelled(
                        self.session_id,
                        &request_id,
                        method,
                        elapsed,
                    ));
                } else {
                    let outcome = if error.is_timeout() {
                        self.send_cancellation(&transport, id, "request timed out")
                            .await;
                        RequestOutcome::TimedOut
                    } else {
                        RequestOutcome::Failed
                    };
                    requests.record_outcome(outcome, elapsed);
                    debug!(
                        "Session {} request {} ({}) failed: {}",
                        self.session_id, request_id, method, error
                    );
                    self.events.emit(EventPayload::request_failed(
                        self.session_id,
                        &request_id,
                        method,
                        elapsed,
                        &error,
                    ));
                }
                Err(error)
            }
        }
    }

    pub async fn ping(&self) -> Result<()> {
        let _: Value = self.execute(methods::PING, None, None, None).await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<ListToolsResult> {
        self.execute(methods::LIST_TOOLS, None, None, None).await
    }

    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let params = json!({ "name": name, "arguments": arguments.unwrap_or_else(|| json!({})) });
        self.execute(methods::CALL_TOOL, Some(params), Some(name), None)
            .await
    }

    /// [`call_tool`](Self::call_tool) that gives up when `cancel` fires
    pub async fn call_tool_with_cancel(
        &self,
        name: &str,
        arguments: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult> {
        let params = json!({ "name": name, "arguments": arguments.unwrap_or_else(|| json!({})) });
        self.execute(methods::CALL_TOOL, Some(params), Some(name), Some(cancel))
            .await
    }

    pub async fn list_resources(&self) -> Result<ListResourcesResult> {
        self.execute(methods::LIST_RESOURCES, None, None, None)
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.execute(
            methods::READ_RESOURCE,
            Some(json!({ "uri": uri })),
            None,
            None,
        )
        .await
    }

    pub async fn read_resource_with_cancel(
        &self,
        uri: &str,
        cancel: &CancellationToken,
    ) -> Result<ReadResourceResult> {
        self.execute(
            methods::READ_RESOURCE,
            Some(json!({ "uri": uri })),
            None,
            Some(cancel),
        )
        .await
    }

    pub async fn list_prompts(&self) -> Result<ListPromptsResult> {
        self.execute(methods::LIST_PROMPTS, None, None, None).await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<PromptArguments>,
    ) -> Result<GetPromptResult> {
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = serde_json::to_value(arguments)?;
        }
        self.execute(methods::GET_PROMPT, Some(params), None, None)
            .await
    }

    /// Close the transport and return to `disconnected`. Idempotent.
    ///
    /// Closing while a handshake is in flight makes that `connect` fail
    /// with a cancellation.
    pub async fn close(&self) -> Result<()> {
        let Ok(previous) = self.transition(ConnectionState::Disconnected, None) else {
            return Ok(());
        };
        if let Some(task) = self.notification_task.lock().take() {
            task.abort();
        }
        let transport = self.current_transport();
        let closed = transport.close().await;

        if previous.is_connected() {
            self.metrics.connection.record_disconnect();
            self.events.emit(EventPayload::connection_closed(
                self.session_id,
                transport.kind(),
            ));
        }
        info!("Session {} connection closed", self.session_id);
        closed
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(task) = self.notification_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn pump_notifications(
    session_id: SessionId,
    mut receiver: mpsc::UnboundedReceiver<JsonRpcNotification>,
    events: EventBus,
    metrics: Arc<ClientMetrics>,
    on_activity: Option<ActivityHook>,
) {
    while let Some(notification) = receiver.recv().await {
        metrics.requests.notifications_received.increment();
        if let Some(hook) = &on_activity {
            hook();
        }

        match notification.method.as_str() {
            methods::TOOLS_LIST_CHANGED => {
                events.emit(EventPayload::tools_list_changed(session_id))
            }
            methods::RESOURCES_LIST_CHANGED => {
                events.emit(EventPayload::resources_list_changed(session_id))
            }
            methods::PROMPTS_LIST_CHANGED => {
                events.emit(EventPayload::prompts_list_changed(session_id))
            }
            methods::LOG_MESSAGE => {
                let params = notification.params.unwrap_or(Value::Null);
                match serde_json::from_value::<LoggingMessage>(params) {
                    Ok(message) => events.emit(EventPayload::server_log(session_id, message)),
                    Err(e) => warn!("Session {} sent a malformed log message: {}", session_id, e),
                }
            }
            other => debug!("Session {} ignoring notification {}", session_id, other),
        }
    }
    debug!("Session {} notification stream ended", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mcp_runtime_core::protocol::{error_codes, JsonRpcError};
    use mcp_runtime_core::transport::{InMemoryServer, InMemoryTransport};
    use mcp_runtime_events::{EventData, EventType};
    use std::time::Duration;

    fn initialize_result() -> Value {
        json!({
            "protocolVersion": MCP_VERSION,
            "serverInfo": { "name": "test-server", "version": "1.2.3" },
            "capabilities": { "tools": { "listChanged": true } }
        })
    }

    fn serve(server: InMemoryServer) {
        server.serve(|request| match request.method.as_str() {
            methods::INITIALIZE => Some(Ok(initialize_result())),
            methods::PING => Some(Ok(json!({}))),
            methods::LIST_TOOLS => Some(Ok(json!({ "tools": [{ "name": "echo" }] }))),
            methods::CALL_TOOL => {
                let name = request.params.as_ref()?.get("name")?.as_str()?.to_string();
                match name.as_str() {
                    "echo" => Some(Ok(json!({ "content": [{ "type": "text", "text": "hi" }] }))),
                    "flaky" => Some(Ok(json!({ "content": [], "isError": true }))),
                    "slow" => None,
                    _ => Some(Err(JsonRpcError::new(
                        error_codes::INVALID_PARAMS,
                        format!("Unknown tool: {}", name),
                    ))),
                }
            }
            _ => Some(Err(JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                "no such method",
            ))),
        });
    }

    fn client_with(config: ClientConfig) -> (McpClient, EventBus, Arc<ClientMetrics>) {
        let (transport, server) = InMemoryTransport::pair(TransportKind::Stdio);
        serve(server);
        let events = EventBus::new();
        let metrics = Arc::new(ClientMetrics::new());
        let client = McpClient::new(
            SessionId::new(),
            Arc::new(transport),
            config,
            events.clone(),
            metrics.clone(),
        );
        (client, events, metrics)
    }

    fn record(events: &EventBus) -> Arc<Mutex<Vec<EventType>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        events.on_any(move |event| sink.lock().push(event.event_type()));
        seen
    }

    #[tokio::test]
    async fn test_connect_populates_capabilities() {
        let (client, events, metrics) = client_with(ClientConfig::default());
        let seen = record(&events);
        assert!(client.capabilities().is_none());

        let result = client.connect().await.unwrap();
        assert_eq!(result.server_info.name, "test-server");
        assert!(client.is_connected());
        assert!(client.capabilities().unwrap().supports_tools());
        assert_eq!(client.server_info().unwrap().version, "1.2.3");

        assert_eq!(
            *seen.lock(),
            vec![
                EventType::ConnectionStateChanged,
                EventType::ConnectionStateChanged,
                EventType::ConnectionEstablished,
            ]
        );
        assert_eq!(metrics.snapshot().counter("connection_successes"), Some(1.0));

        assert_matches!(client.connect().await, Err(Error::AlreadyConnected { .. }));
    }

    #[tokio::test]
    async fn test_request_event_sequence() {
        let (client, events, metrics) = client_with(ClientConfig::default());
        client.connect().await.unwrap();
        let seen = record(&events);

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.tools[0].name, "echo");
        let result = client.call_tool("echo", None).await.unwrap();
        assert_eq!(result.content[0].as_text(), Some("hi"));

        assert_eq!(
            *seen.lock(),
            vec![
                EventType::RequestStart,
                EventType::RequestComplete,
                EventType::RequestStart,
                EventType::ToolStart,
                EventType::ToolComplete,
                EventType::RequestComplete,
            ]
        );
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counter("requests_total"), Some(2.0));
        assert_eq!(snapshot.counter("tool_calls"), Some(1.0));
        assert_eq!(snapshot.counter("request_errors"), Some(0.0));
    }

    #[tokio::test]
    async fn test_unknown_tool_maps_to_tool_not_found() {
        let (client, events, metrics) = client_with(ClientConfig::default());
        client.connect().await.unwrap();
        let seen = record(&events);

        let err = client.call_tool("missing", None).await.unwrap_err();
        assert_matches!(err, Error::ToolNotFound { ref name } if name == "missing");
        assert_eq!(
            *seen.lock(),
            vec![
                EventType::RequestStart,
                EventType::ToolStart,
                EventType::ToolError,
                EventType::RequestError,
            ]
        );
        assert_eq!(metrics.snapshot().counter("tool_errors"), Some(1.0));
    }

    #[tokio::test]
    async fn test_tool_reported_error_completes_request() {
        let (client, events, _metrics) = client_with(ClientConfig::default());
        client.connect().await.unwrap();
        let completed = Arc::new(Mutex::new(None));
        let sink = completed.clone();
        events.on(EventType::ToolComplete, move |event| {
            if let EventData::Tool(data) = event.data() {
                *sink.lock() = Some(data.is_error);
            }
        });

        let result = client.call_tool("flaky", None).await.unwrap();
        assert!(result.is_error);
        assert_eq!(*completed.lock(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let config = ClientConfig {
            request_timeout_ms: 500,
            ..ClientConfig::default()
        };
        let (client, events, metrics) = client_with(config);
        client.connect().await.unwrap();
        let seen = record(&events);

        let err = client.call_tool("slow", None).await.unwrap_err();
        assert_matches!(err, Error::Timeout { timeout_ms: 500, .. });
        assert_eq!(seen.lock().last(), Some(&EventType::RequestError));
        assert_eq!(metrics.snapshot().counter("request_timeouts"), Some(1.0));
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let (client, events, metrics) = client_with(ClientConfig::default());
        client.connect().await.unwrap();
        let seen = record(&events);

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = client
            .call_tool_with_cancel("slow", None, &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(seen.lock().last(), Some(&EventType::RequestCancelled));
        assert!(!seen.lock().contains(&EventType::RequestError));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counter("requests_cancelled"), Some(1.0));
        assert_eq!(snapshot.counter("request_errors"), Some(0.0));
    }

    #[tokio::test]
    async fn test_request_requires_connection() {
        let (client, _events, _metrics) = client_with(ClientConfig::default());
        assert_matches!(client.ping().await, Err(Error::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_notifications_become_events() {
        let (transport, server) = InMemoryTransport::pair(TransportKind::Sse);
        let handle = server.handle();
        serve(server);
        let events = EventBus::new();
        let client = McpClient::new(
            SessionId::new(),
            Arc::new(transport),
            ClientConfig::default(),
            events.clone(),
            Arc::new(ClientMetrics::new()),
        );
        client.connect().await.unwrap();

        let waiter = {
            let events = events.clone();
            tokio::spawn(async move {
                events
                    .wait_for(EventType::ServerLog, Some(Duration::from_secs(5)))
                    .await
            })
        };
        tokio::task::yield_now().await;
        handle
            .notify(
                methods::LOG_MESSAGE,
                Some(json!({ "level": "info", "data": "indexing done" })),
            )
            .unwrap();

        let event = waiter.await.unwrap().unwrap();
        assert_eq!(event.session_id(), client.session_id());
        assert_matches!(event.data(), EventData::Log(data) if data.level == "info");
    }

    #[tokio::test]
    async fn test_failed_handshake_leaves_error_state() {
        let (transport, server) = InMemoryTransport::pair(TransportKind::Stdio);
        drop(server);
        let events = EventBus::new();
        let seen = record(&events);
        let metrics = Arc::new(ClientMetrics::new());
        let client = McpClient::new(
            SessionId::new(),
            Arc::new(transport),
            ClientConfig::default(),
            events,
            metrics.clone(),
        );

        assert!(client.connect().await.is_err());
        assert_eq!(client.state(), ConnectionState::Error);
        assert!(client.capabilities().is_none());
        assert_eq!(seen.lock().last(), Some(&EventType::ConnectionError));
        assert_eq!(metrics.snapshot().counter("connection_failures"), Some(1.0));
    }

    #[tokio::test]
    async fn test_close_emits_closed_once() {
        let (client, events, _metrics) = client_with(ClientConfig::default());
        client.connect().await.unwrap();
        let seen = record(&events);

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.server_info().is_none());
        assert_eq!(
            seen.lock()
                .iter()
                .filter(|t| **t == EventType::ConnectionClosed)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_close_during_handshake_cancels_connect() {
        let (transport, server) = InMemoryTransport::pair(TransportKind::Stdio);
        server.serve(|request| match request.method.as_str() {
            methods::INITIALIZE => None,
            _ => Some(Ok(json!({}))),
        });
        let events = EventBus::new();
        let seen = record(&events);
        let metrics = Arc::new(ClientMetrics::new());
        let client = McpClient::new(
            SessionId::new(),
            Arc::new(transport),
            ClientConfig::default(),
            events,
            metrics.clone(),
        );

        let (connected, closed) = tokio::join!(client.connect(), async {
            tokio::task::yield_now().await;
            client.close().await
        });
        closed.unwrap();
        assert!(connected.unwrap_err().is_cancelled());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.snapshot().capabilities.is_none());
        assert_eq!(seen.lock().last(), Some(&EventType::ConnectionError));
        assert!(!seen.lock().contains(&EventType::ConnectionClosed));
        assert_eq!(metrics.snapshot().counter("connection_failures"), Some(1.0));
    }

    #[tokio::test]
    async fn test_concurrent_reconnects_admit_one() {
        let (transport, server) = InMemoryTransport::pair(TransportKind::Stdio);
        drop(server);
        let client = McpClient::new(
            SessionId::new(),
            Arc::new(transport),
            ClientConfig::default(),
            EventBus::new(),
            Arc::new(ClientMetrics::new()),
        );
        assert!(client.connect().await.is_err());

        let (first, first_server) = InMemoryTransport::pair(TransportKind::Stdio);
        serve(first_server);
        let (second, second_server) = InMemoryTransport::pair(TransportKind::Sse);
        serve(second_server);

        let (a, b) = tokio::join!(
            client.reconnect(Arc::new(first)),
            client.reconnect(Arc::new(second))
        );
        assert!(a.is_ok());
        assert_matches!(b, Err(Error::AlreadyConnected { .. }));
        assert_eq!(client.transport_kind(), TransportKind::Stdio);
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_tracks_connection() {
        let (client, _events, _metrics) = client_with(ClientConfig::default());
        let snapshot = client.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(snapshot.server_info.is_none());

        client.connect().await.unwrap();
        let snapshot = client.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Connected);
        assert_eq!(snapshot.server_info.unwrap().name, "test-server");
        assert!(snapshot.capabilities.unwrap().supports_tools());

        client.close().await.unwrap();
        let snapshot = client.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(snapshot.capabilities.is_none());
    }
}

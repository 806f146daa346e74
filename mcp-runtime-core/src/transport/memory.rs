//! In-memory transport for testing and local embedding
//!
//! [`InMemoryTransport::pair`] returns the client half, which implements
//! [`Transport`], and an [`InMemoryServer`] that plays the remote peer.

use super::{unsupported, Transport, TransportConfig, TransportConnector, TransportKind};
use crate::{
    protocol::{
        error_codes, methods, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
        JsonRpcResponse,
    },
    Error, Result,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// Client half of an in-memory connection
pub struct InMemoryTransport {
    kind: TransportKind,
    to_server: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    from_server: Mutex<Option<mpsc::UnboundedReceiver<JsonRpcMessage>>>,
    pending: PendingMap,
    notifications_tx: mpsc::UnboundedSender<JsonRpcNotification>,
    notifications_rx: Mutex<Option<mpsc::UnboundedReceiver<JsonRpcNotification>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    open: Arc<AtomicBool>,
}

/// Removes a pending request entry when the awaiting future goes away
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    key: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.key);
    }
}

impl InMemoryTransport {
    /// Create a connected client/server pair
    pub fn pair(kind: TransportKind) -> (Self, InMemoryServer) {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();

        let transport = Self {
            kind,
            to_server: Mutex::new(Some(client_tx)),
            from_server: Mutex::new(Some(client_rx)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            notifications_tx,
            notifications_rx: Mutex::new(Some(notifications_rx)),
            reader: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
        };
        let server = InMemoryServer {
            incoming: server_rx,
            handle: ServerHandle { outgoing: server_tx },
        };
        (transport, server)
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    fn sender(&self) -> Result<mpsc::UnboundedSender<JsonRpcMessage>> {
        self.to_server
            .lock()
            .clone()
            .ok_or_else(|| Error::connection_closed("in-memory transport is closed"))
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn open(&self) -> Result<()> {
        if self.is_open() {
            return Err(Error::transport("in-memory transport is already open"));
        }
        let mut receiver = self.from_server.lock().take().ok_or_else(|| {
            Error::connection_failed("in-memory transport cannot be reopened after close")
        })?;
        let reply = self.sender()?;

        let pending = self.pending.clone();
        let notifications = self.notifications_tx.clone();
        let open = self.open.clone();
        open.store(true, Ordering::SeqCst);

        let reader = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    JsonRpcMessage::Response(response) => {
                        let key = response.id.to_string();
                        match pending.lock().remove(&key) {
                            Some(waiter) => {
                                let _ = waiter.send(response);
                            }
                            None => warn!("Dropping response for unknown request id {}", key),
                        }
                    }
                    JsonRpcMessage::Notification(notification) => {
                        debug!("Received server notification: {}", notification.method);
                        let _ = notifications.send(notification);
                    }
                    JsonRpcMessage::Request(request) => {
                        // Server-initiated requests: answer pings, refuse the rest
                        let response = if request.method == methods::PING {
                            JsonRpcResponse::success(request.id, Value::Object(Default::default()))
                        } else {
                            JsonRpcResponse::error(
                                request.id,
                                JsonRpcError::new(
                                    error_codes::METHOD_NOT_FOUND,
                                    format!("client does not handle '{}'", request.method),
                                ),
                            )
                        };
                        let _ = reply.send(JsonRpcMessage::Response(response));
                    }
                }
            }
            debug!("In-memory server side closed");
            open.store(false, Ordering::SeqCst);
            pending.lock().clear();
        });

        *self.reader.lock() = Some(reader);
        debug!("In-memory {} transport opened", self.kind);
        Ok(())
    }

    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !self.is_open() {
            return Err(Error::connection_closed("in-memory transport is not open"));
        }
        let sender = self.sender()?;
        let key = request.id.to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(key.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            key,
        };

        sender
            .send(JsonRpcMessage::Request(request))
            .map_err(|_| Error::connection_closed("in-memory server has gone away"))?;

        rx.await
            .map_err(|_| Error::connection_closed("connection closed before a response arrived"))
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        if !self.is_open() {
            return Err(Error::connection_closed("in-memory transport is not open"));
        }
        self.sender()?
            .send(JsonRpcMessage::Notification(notification))
            .map_err(|_| Error::connection_closed("in-memory server has gone away"))
    }

    fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcNotification>> {
        self.notifications_rx.lock().take()
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.to_server.lock().take();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        // Dropping the waiters fails every in-flight request
        self.pending.lock().clear();
        debug!("In-memory {} transport closed", self.kind);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Server half of an in-memory connection
pub struct InMemoryServer {
    incoming: mpsc::UnboundedReceiver<JsonRpcMessage>,
    handle: ServerHandle,
}

/// Cloneable handle for pushing messages from the server side
#[derive(Clone)]
pub struct ServerHandle {
    outgoing: mpsc::UnboundedSender<JsonRpcMessage>,
}

impl ServerHandle {
    pub fn respond(&self, response: JsonRpcResponse) -> Result<()> {
        self.outgoing
            .send(JsonRpcMessage::Response(response))
            .map_err(|_| Error::connection_closed("client side has gone away"))
    }

    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.outgoing
            .send(JsonRpcMessage::Notification(JsonRpcNotification::new(
                method, params,
            )))
            .map_err(|_| Error::connection_closed("client side has gone away"))
    }
}

impl InMemoryServer {
    /// Receive the next message sent by the client
    pub async fn recv(&mut self) -> Option<JsonRpcMessage> {
        self.incoming.recv().await
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Answer requests with `handler` on a background task.
    ///
    /// Returning `None` leaves the request unanswered. Client notifications
    /// are ignored.
    pub fn serve<F>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(&JsonRpcRequest) -> Option<std::result::Result<Value, JsonRpcError>>
            + Send
            + 'static,
    {
        tokio::spawn(async move {
            while let Some(message) = self.incoming.recv().await {
                let JsonRpcMessage::Request(request) = message else {
                    continue;
                };
                let Some(outcome) = handler(&request) else {
                    debug!("In-memory server leaving '{}' unanswered", request.method);
                    continue;
                };
                let response = match outcome {
                    Ok(result) => JsonRpcResponse::success(request.id.clone(), result),
                    Err(error) => JsonRpcResponse::error(request.id.clone(), error),
                };
                if self.handle.respond(response).is_err() {
                    break;
                }
            }
        })
    }
}

type ConnectHook = dyn Fn(&TransportConfig, InMemoryServer) -> Result<()> + Send + Sync;

/// Connector that backs every configuration with an in-memory pair
///
/// The hook receives the server half of each new connection; dropping it
/// simulates a peer that refuses the connection.
pub struct InMemoryConnector {
    on_connect: Box<ConnectHook>,
    supported: Vec<TransportKind>,
}

impl InMemoryConnector {
    pub fn new<F>(on_connect: F) -> Self
    where
        F: Fn(&TransportConfig, InMemoryServer) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            on_connect: Box::new(on_connect),
            supported: vec![
                TransportKind::Stdio,
                TransportKind::Sse,
                TransportKind::StreamableHttp,
            ],
        }
    }

    /// Restrict the transport kinds this connector accepts
    pub fn with_kinds(mut self, kinds: &[TransportKind]) -> Self {
        self.supported = kinds.to_vec();
        self
    }
}

impl TransportConnector for InMemoryConnector {
    fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        let kind = config.kind();
        if !self.supported.contains(&kind) {
            return Err(unsupported(kind));
        }
        let (transport, server) = InMemoryTransport::pair(kind);
        (self.on_connect)(config, server)?;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn echo_server(server: InMemoryServer) -> JoinHandle<()> {
        server.serve(|request| Some(Ok(json!({ "method": request.method }))))
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let (transport, server) = InMemoryTransport::pair(TransportKind::Stdio);
        let _server = echo_server(server);

        transport.open().await.unwrap();
        let response = transport
            .request(JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap();
        assert_eq!(response.id, json!(1));
        assert_eq!(response.result, Some(json!({"method": "tools/list"})));
        assert_eq!(transport.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_are_correlated() {
        let (transport, mut server) = InMemoryTransport::pair(TransportKind::Sse);
        let transport = Arc::new(transport);
        transport.open().await.unwrap();

        let first = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request(JsonRpcRequest::new(1, "a", None)).await })
        };
        let second = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request(JsonRpcRequest::new(2, "b", None)).await })
        };

        let mut received = Vec::new();
        for _ in 0..2 {
            match server.recv().await.unwrap() {
                JsonRpcMessage::Request(request) => received.push(request),
                other => panic!("unexpected message: {:?}", other),
            }
        }
        // Answer in reverse arrival order
        let handle = server.handle();
        for request in received.iter().rev() {
            handle
                .respond(JsonRpcResponse::success(
                    request.id.clone(),
                    json!(request.method.clone()),
                ))
                .unwrap();
        }

        assert_eq!(first.await.unwrap().unwrap().result, Some(json!("a")));
        assert_eq!(second.await.unwrap().unwrap().result, Some(json!("b")));
    }

    #[tokio::test]
    async fn test_notifications_are_forwarded() {
        let (transport, server) = InMemoryTransport::pair(TransportKind::StreamableHttp);
        let handle = server.handle();
        let _server = echo_server(server);

        let mut notifications = transport.take_notifications().unwrap();
        assert!(transport.take_notifications().is_none());
        transport.open().await.unwrap();

        handle.notify(methods::TOOLS_LIST_CHANGED, None).unwrap();
        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.method, methods::TOOLS_LIST_CHANGED);
    }

    #[tokio::test]
    async fn test_close_fails_in_flight_requests() {
        let (transport, server) = InMemoryTransport::pair(TransportKind::Stdio);
        let transport = Arc::new(transport);
        let _server = server.serve(|_| None);
        transport.open().await.unwrap();

        let in_flight = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request(JsonRpcRequest::new(9, "slow", None)).await })
        };
        tokio::task::yield_now().await;
        while transport.pending_requests() == 0 {
            tokio::task::yield_now().await;
        }

        transport.close().await.unwrap();
        assert!(!transport.is_open());
        assert_matches!(
            in_flight.await.unwrap(),
            Err(Error::ConnectionClosed { .. })
        );
        assert_matches!(
            transport.request(JsonRpcRequest::new(10, "late", None)).await,
            Err(Error::ConnectionClosed { .. })
        );
        // Closing twice is fine
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_open_is_rejected() {
        let (transport, server) = InMemoryTransport::pair(TransportKind::Stdio);
        let _server = echo_server(server);
        transport.open().await.unwrap();
        assert_matches!(transport.open().await, Err(Error::Transport { .. }));
    }

    #[tokio::test]
    async fn test_dropped_server_fails_requests() {
        let (transport, server) = InMemoryTransport::pair(TransportKind::Stdio);
        drop(server);
        transport.open().await.unwrap();
        let result = transport.request(JsonRpcRequest::new(1, "ping", None)).await;
        assert_matches!(result, Err(Error::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn test_connector_rejects_unsupported_kinds() {
        let connector = InMemoryConnector::new(|_, server| {
            echo_server(server);
            Ok(())
        })
        .with_kinds(&[TransportKind::Stdio]);

        assert!(connector
            .create(&TransportConfig::stdio("server", Vec::<String>::new()))
            .is_ok());
        assert_matches!(
            connector.create(&TransportConfig::sse("http://localhost/sse")).err(),
            Some(Error::UnsupportedTransport { kind }) if kind == "sse"
        );
    }
}

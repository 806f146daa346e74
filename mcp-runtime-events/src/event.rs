//! Typed event model
//!
//! Every lifecycle transition in the runtime is published as an
//! [`EventPayload`]: an immutable, timestamped record tagged with an
//! [`EventType`] and carrying strongly typed [`EventData`].

use chrono::{DateTime, Utc};
use mcp_runtime_core::{
    protocol::LoggingMessage, ConnectionState, DestroyReason, Error, SessionId, TransportKind,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Event types published on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "connection:state_change")]
    ConnectionStateChanged,
    #[serde(rename = "connection:established")]
    ConnectionEstablished,
    #[serde(rename = "connection:closed")]
    ConnectionClosed,
    #[serde(rename = "connection:error")]
    ConnectionError,
    #[serde(rename = "connection:reconnecting")]
    ConnectionReconnecting,
    #[serde(rename = "tools:list_changed")]
    ToolsListChanged,
    #[serde(rename = "resources:list_changed")]
    ResourcesListChanged,
    #[serde(rename = "prompts:list_changed")]
    PromptsListChanged,
    #[serde(rename = "tool:start")]
    ToolStart,
    #[serde(rename = "tool:complete")]
    ToolComplete,
    #[serde(rename = "tool:error")]
    ToolError,
    #[serde(rename = "request:start")]
    RequestStart,
    #[serde(rename = "request:complete")]
    RequestComplete,
    #[serde(rename = "request:error")]
    RequestError,
    #[serde(rename = "request:cancelled")]
    RequestCancelled,
    #[serde(rename = "server:log")]
    ServerLog,
    #[serde(rename = "session:created")]
    SessionCreated,
    #[serde(rename = "session:destroyed")]
    SessionDestroyed,
}

impl EventType {
    pub const ALL: [EventType; 18] = [
        EventType::ConnectionStateChanged,
        EventType::ConnectionEstablished,
        EventType::ConnectionClosed,
        EventType::ConnectionError,
        EventType::ConnectionReconnecting,
        EventType::ToolsListChanged,
        EventType::ResourcesListChanged,
        EventType::PromptsListChanged,
        EventType::ToolStart,
        EventType::ToolComplete,
        EventType::ToolError,
        EventType::RequestStart,
        EventType::RequestComplete,
        EventType::RequestError,
        EventType::RequestCancelled,
        EventType::ServerLog,
        EventType::SessionCreated,
        EventType::SessionDestroyed,
    ];

    /// Wire name of the event type, e.g. `session:created`
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ConnectionStateChanged => "connection:state_change",
            EventType::ConnectionEstablished => "connection:established",
            EventType::ConnectionClosed => "connection:closed",
            EventType::ConnectionError => "connection:error",
            EventType::ConnectionReconnecting => "connection:reconnecting",
            EventType::ToolsListChanged => "tools:list_changed",
            EventType::ResourcesListChanged => "resources:list_changed",
            EventType::PromptsListChanged => "prompts:list_changed",
            EventType::ToolStart => "tool:start",
            EventType::ToolComplete => "tool:complete",
            EventType::ToolError => "tool:error",
            EventType::RequestStart => "request:start",
            EventType::RequestComplete => "request:complete",
            EventType::RequestError => "request:error",
            EventType::RequestCancelled => "request:cancelled",
            EventType::ServerLog => "server:log",
            EventType::SessionCreated => "session:created",
            EventType::SessionDestroyed => "session:destroyed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event data - strongly typed per event family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventData {
    Connection(ConnectionEventData),
    Reconnect(ReconnectEventData),
    ListChanged(ListChangedEventData),
    Request(RequestEventData),
    Tool(ToolEventData),
    Log(ServerLogEventData),
    Session(SessionEventData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEventData {
    pub session_id: SessionId,
    pub transport: TransportKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<ConnectionState>,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectEventData {
    pub session_id: SessionId,
    pub transport: TransportKind,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListChangedEventData {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEventData {
    pub session_id: SessionId,
    pub request_id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEventData {
    pub session_id: SessionId,
    pub request_id: String,
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// The tool ran but reported a failure in its result
    #[serde(default)]
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerLogEventData {
    pub session_id: SessionId,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEventData {
    pub session_id: SessionId,
    pub transport: TransportKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DestroyReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifetime_ms: Option<f64>,
}

/// Error snapshot carried inside events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ErrorInfo {
    fn from(error: &Error) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Strongly typed, immutable event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    event_type: EventType,
    timestamp: DateTime<Utc>,
    data: EventData,
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

impl EventPayload {
    fn new(event_type: EventType, data: EventData) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    /// Session the event belongs to
    pub fn session_id(&self) -> SessionId {
        match &self.data {
            EventData::Connection(d) => d.session_id,
            EventData::Reconnect(d) => d.session_id,
            EventData::ListChanged(d) => d.session_id,
            EventData::Request(d) => d.session_id,
            EventData::Tool(d) => d.session_id,
            EventData::Log(d) => d.session_id,
            EventData::Session(d) => d.session_id,
        }
    }

    /// A session's connection moved between states
    pub fn connection_state_changed(
        session_id: SessionId,
        transport: TransportKind,
        previous_state: ConnectionState,
        state: ConnectionState,
    ) -> Self {
        Self::new(
            EventType::ConnectionStateChanged,
            EventData::Connection(ConnectionEventData {
                session_id,
                transport,
                previous_state: Some(previous_state),
                state,
                error: None,
            }),
        )
    }

    pub fn connection_established(session_id: SessionId, transport: TransportKind) -> Self {
        Self::new(
            EventType::ConnectionEstablished,
            EventData::Connection(ConnectionEventData {
                session_id,
                transport,
                previous_state: None,
                state: ConnectionState::Connected,
                error: None,
            }),
        )
    }

    pub fn connection_closed(session_id: SessionId, transport: TransportKind) -> Self {
        Self::new(
            EventType::ConnectionClosed,
            EventData::Connection(ConnectionEventData {
                session_id,
                transport,
                previous_state: None,
                state: ConnectionState::Disconnected,
                error: None,
            }),
        )
    }

    pub fn connection_error(session_id: SessionId, transport: TransportKind, error: &Error) -> Self {
        Self::new(
            EventType::ConnectionError,
            EventData::Connection(ConnectionEventData {
                session_id,
                transport,
                previous_state: None,
                state: ConnectionState::Error,
                error: Some(error.into()),
            }),
        )
    }

    pub fn connection_reconnecting(
        session_id: SessionId,
        transport: TransportKind,
        attempt: u32,
    ) -> Self {
        Self::new(
            EventType::ConnectionReconnecting,
            EventData::Reconnect(ReconnectEventData {
                session_id,
                transport,
                attempt,
            }),
        )
    }

    pub fn tools_list_changed(session_id: SessionId) -> Self {
        Self::new(
            EventType::ToolsListChanged,
            EventData::ListChanged(ListChangedEventData { session_id }),
        )
    }

    pub fn resources_list_changed(session_id: SessionId) -> Self {
        Self::new(
            EventType::ResourcesListChanged,
            EventData::ListChanged(ListChangedEventData { session_id }),
        )
    }

    pub fn prompts_list_changed(session_id: SessionId) -> Self {
        Self::new(
            EventType::PromptsListChanged,
            EventData::ListChanged(ListChangedEventData { session_id }),
        )
    }

    fn request(
        event_type: EventType,
        session_id: SessionId,
        request_id: &str,
        method: &str,
        duration: Option<Duration>,
        error: Option<&Error>,
    ) -> Self {
        Self::new(
            event_type,
            EventData::Request(RequestEventData {
                session_id,
                request_id: request_id.to_string(),
                method: method.to_string(),
                duration_ms: duration.map(millis),
                error: error.map(ErrorInfo::from),
            }),
        )
    }

    pub fn request_started(session_id: SessionId, request_id: &str, method: &str) -> Self {
        Self::request(EventType::RequestStart, session_id, request_id, method, None, None)
    }

    pub fn request_completed(
        session_id: SessionId,
        request_id: &str,
        method: &str,
        duration: Duration,
    ) -> Self {
        Self::request(
            EventType::RequestComplete,
            session_id,
            request_id,
            method,
            Some(duration),
            None,
        )
    }

    pub fn request_failed(
        session_id: SessionId,
        request_id: &str,
        method: &str,
        duration: Duration,
        error: &Error,
    ) -> Self {
        Self::request(
            EventType::RequestError,
            session_id,
            request_id,
            method,
            Some(duration),
            Some(error),
        )
    }

    pub fn request_cancelled(
        session_id: SessionId,
        request_id: &str,
        method: &str,
        duration: Duration,
    ) -> Self {
        Self::request(
            EventType::RequestCancelled,
            session_id,
            request_id,
            method,
            Some(duration),
            None,
        )
    }

    pub fn tool_started(session_id: SessionId, request_id: &str, tool_name: &str) -> Self {
        Self::new(
            EventType::ToolStart,
            EventData::Tool(ToolEventData {
                session_id,
                request_id: request_id.to_string(),
                tool_name: tool_name.to_string(),
                duration_ms: None,
                is_error: false,
                error: None,
            }),
        )
    }

    pub fn tool_completed(
        session_id: SessionId,
        request_id: &str,
        tool_name: &str,
        duration: Duration,
        is_error: bool,
    ) -> Self {
        Self::new(
            EventType::ToolComplete,
            EventData::Tool(ToolEventData {
                session_id,
                request_id: request_id.to_string(),
                tool_name: tool_name.to_string(),
                duration_ms: Some(millis(duration)),
                is_error,
                error: None,
            }),
        )
    }

    pub fn tool_failed(
        session_id: SessionId,
        request_id: &str,
        tool_name: &str,
        duration: Duration,
        error: &Error,
    ) -> Self {
        Self::new(
            EventType::ToolError,
            EventData::Tool(ToolEventData {
                session_id,
                request_id: request_id.to_string(),
                tool_name: tool_name.to_string(),
                duration_ms: Some(millis(duration)),
                is_error: true,
                error: Some(error.into()),
            }),
        )
    }

    pub fn server_log(session_id: SessionId, message: LoggingMessage) -> Self {
        Self::new(
            EventType::ServerLog,
            EventData::Log(ServerLogEventData {
                session_id,
                level: message.level,
                logger: message.logger,
                data: message.data,
            }),
        )
    }

    pub fn session_created(session_id: SessionId, transport: TransportKind) -> Self {
        Self::new(
            EventType::SessionCreated,
            EventData::Session(SessionEventData {
                session_id,
                transport,
                reason: None,
                lifetime_ms: None,
            }),
        )
    }

    pub fn session_destroyed(
        session_id: SessionId,
        transport: TransportKind,
        reason: DestroyReason,
        lifetime: Duration,
    ) -> Self {
        Self::new(
            EventType::SessionDestroyed,
            EventData::Session(SessionEventData {
                session_id,
                transport,
                reason: Some(reason),
                lifetime_ms: Some(millis(lifetime)),
            }),
        )
    }
}

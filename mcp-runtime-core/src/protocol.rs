//! MCP protocol boundary types
//!
//! Only the shapes the runtime itself consumes live here: JSON-RPC 2.0
//! envelopes, the initialize handshake, the negotiated capability set and the
//! listing/result types returned to callers. Wire framing belongs to the
//! transports.

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// MCP protocol version requested by this client
pub const MCP_VERSION: &str = "2024-11-05";

/// JSON-RPC protocol version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard MCP method names
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
    pub const LIST_RESOURCES: &str = "resources/list";
    pub const READ_RESOURCE: &str = "resources/read";
    pub const LIST_PROMPTS: &str = "prompts/list";
    pub const GET_PROMPT: &str = "prompts/get";

    // Server-initiated notifications
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
    pub const LOG_MESSAGE: &str = "notifications/message";
    pub const CANCELLED: &str = "notifications/cancelled";
}

/// JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// MCP-specific code for an unknown resource URI
    pub const RESOURCE_NOT_FOUND: i32 = -32002;
}

/// JSON-RPC 2.0 message types for MCP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// JSON-RPC 2.0 request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 notification message (no response expected)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Unwrap the result payload, converting a JSON-RPC error into a typed
    /// runtime error for the given method and params
    pub fn into_result(self, method: &str, params: Option<&Value>) -> Result<Value, Error> {
        if let Some(error) = self.error {
            return Err(error.into_error(method, params));
        }
        self.result.ok_or_else(|| {
            Error::invalid_response(format!("response to '{}' has neither result nor error", method))
        })
    }
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Map a JSON-RPC error onto the runtime error taxonomy
    pub fn into_error(self, method: &str, params: Option<&Value>) -> Error {
        let param_str = |key: &str| {
            params
                .and_then(|p| p.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let reports_unknown_name = {
            let lower = self.message.to_lowercase();
            lower.contains("not found") || lower.contains("unknown")
        };

        match self.code {
            error_codes::PARSE_ERROR | error_codes::INVALID_REQUEST => Error::InvalidRequest {
                message: self.message,
            },
            error_codes::METHOD_NOT_FOUND => Error::MethodNotFound {
                method: method.to_string(),
            },
            error_codes::RESOURCE_NOT_FOUND => Error::ResourceNotFound {
                uri: param_str("uri"),
            },
            error_codes::INVALID_PARAMS
                if method == methods::CALL_TOOL && reports_unknown_name =>
            {
                Error::ToolNotFound {
                    name: param_str("name"),
                }
            }
            error_codes::INVALID_PARAMS
                if method == methods::GET_PROMPT && reports_unknown_name =>
            {
                Error::PromptNotFound {
                    name: param_str("name"),
                }
            }
            error_codes::INVALID_PARAMS => Error::InvalidParams {
                message: self.message,
            },
            code => Error::Server {
                code,
                message: self.message,
                data: self.data,
            },
        }
    }
}

/// Name and version of a protocol peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub version: String,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Client capabilities advertised during the handshake
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<Value>,
}

/// MCP initialization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "clientInfo")]
    pub client_info: PeerInfo,
    pub capabilities: ClientCapabilities,
}

/// MCP initialization result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "serverInfo")]
    pub server_info: PeerInfo,
    pub capabilities: ServerCapabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Capability set negotiated with a connected server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

impl ServerCapabilities {
    pub fn supports_tools(&self) -> bool {
        self.tools.is_some()
    }

    pub fn supports_resources(&self) -> bool {
        self.resources.is_some()
    }

    pub fn supports_prompts(&self) -> bool {
        self.prompts.is_some()
    }
}

/// Prompts capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptsCapability {
    #[serde(rename = "listChanged")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Resources capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[serde(rename = "listChanged")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Tools capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Tool advertised by a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Content block returned by tools and prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: ResourceContents,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// Resource advertised by a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

/// Prompt template advertised by a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPromptsResult {
    pub prompts: Vec<Prompt>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: Content,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetPromptResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

/// Arguments passed to `prompts/get`
pub type PromptArguments = HashMap<String, String>;

/// Payload of a `notifications/message` log notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingMessage {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_initialize_result_parses_capabilities() {
        let raw = json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": {"name": "chain-tools", "version": "2.1.0"},
            "capabilities": {
                "tools": {"listChanged": true},
                "resources": {"subscribe": true}
            }
        });

        let result: InitializeResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.server_info, PeerInfo::new("chain-tools", "2.1.0"));
        assert!(result.capabilities.supports_tools());
        assert!(result.capabilities.supports_resources());
        assert!(!result.capabilities.supports_prompts());
        assert_eq!(
            result.capabilities.tools.unwrap().list_changed,
            Some(true)
        );
    }

    #[test]
    fn test_request_serialization_skips_empty_params() {
        let request = JsonRpcRequest::new(7, methods::PING, None);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}));
    }

    #[test]
    fn test_error_mapping() {
        let params = json!({"name": "swap", "uri": "file:///a"});

        let err = JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "nope")
            .into_error(methods::LIST_PROMPTS, None);
        assert_matches!(err, Error::MethodNotFound { method } if method == "prompts/list");

        let err = JsonRpcError::new(error_codes::INVALID_PARAMS, "Unknown tool: swap")
            .into_error(methods::CALL_TOOL, Some(&params));
        assert_matches!(err, Error::ToolNotFound { name } if name == "swap");

        let err = JsonRpcError::new(error_codes::INVALID_PARAMS, "amount must be positive")
            .into_error(methods::CALL_TOOL, Some(&params));
        assert_matches!(err, Error::InvalidParams { .. });

        let err = JsonRpcError::new(error_codes::RESOURCE_NOT_FOUND, "missing")
            .into_error(methods::READ_RESOURCE, Some(&params));
        assert_matches!(err, Error::ResourceNotFound { uri } if uri == "file:///a");

        let err = JsonRpcError::new(error_codes::PARSE_ERROR, "bad json")
            .into_error(methods::PING, None);
        assert_matches!(err, Error::InvalidRequest { .. });

        let err = JsonRpcError::new(-1, "rate limited").into_error(methods::CALL_TOOL, None);
        assert_matches!(err, Error::Server { code: -1, .. });
    }

    #[test]
    fn test_response_into_result() {
        let ok = JsonRpcResponse::success(json!(1), json!({"tools": []}));
        assert_eq!(ok.into_result(methods::LIST_TOOLS, None).unwrap(), json!({"tools": []}));

        let empty = JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: json!(2),
            result: None,
            error: None,
        };
        assert_matches!(
            empty.into_result(methods::PING, None),
            Err(Error::InvalidResponse { .. })
        );
    }

    #[test]
    fn test_content_tagging() {
        let content: Content = serde_json::from_value(json!({"type": "text", "text": "hi"})).unwrap();
        assert_eq!(content.as_text(), Some("hi"));

        let result: CallToolResult =
            serde_json::from_value(json!({"content": [{"type": "text", "text": "ok"}]})).unwrap();
        assert!(!result.is_error);
    }
}

//! Typed lifecycle events for the MCP session runtime
//!
//! Producers (the session manager and per-session clients) publish
//! [`EventPayload`]s through a shared [`EventBus`]; loggers, UIs and test
//! harnesses subscribe by [`EventType`], once, or to everything.

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventBusConfig, Subscription};
pub use event::{
    ConnectionEventData, ErrorInfo, EventData, EventPayload, EventType, ListChangedEventData,
    ReconnectEventData, RequestEventData, ServerLogEventData, SessionEventData, ToolEventData,
};

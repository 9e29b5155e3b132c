//! The values handed to registered handlers.

use crate::envelope::{NotificationEventType, OperationType};

/// Context for a `Custom` method handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub params: String,
    pub streaming: bool,
}

/// Context for a `ToolInvoke` handler.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tool_id: u32,
    pub params: Vec<(String, String)>,
}

/// Raw bytes delivered on a stream with no associated event name or type.
#[derive(Debug, Clone)]
pub struct RawStreamContext {
    pub stream_id: u32,
    pub sequence_id: u32,
    pub is_final: bool,
    pub data: Vec<u8>,
}

/// Either kind of named stream event: an operation on some resource, or
/// a notification about one.
#[derive(Debug, Clone)]
pub enum StreamEventKind {
    Operation(OperationType),
    Notification(NotificationEventType),
}

/// A named, typed event delivered on a stream.
#[derive(Debug, Clone)]
pub struct StreamEventContext {
    pub stream_id: u32,
    pub sequence_id: u32,
    pub is_final: bool,
    pub name: String,
    pub kind: StreamEventKind,
    pub data: Vec<u8>,
}

/// The payload delivered to a signal handler.
#[derive(Debug, Clone)]
pub enum SignalContext {
    Terminate,
    StreamRaw(RawStreamContext),
    StreamEvent(StreamEventContext),
}

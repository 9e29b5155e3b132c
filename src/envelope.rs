//! Wire types carried inside a frame.
//!
//! A frame's body decodes to exactly one [`Envelope`]. Everything below
//! it is opaque to the transport: methods and tools hand raw bytes to
//! whatever the registry has wired up, the runtime never inspects them.

use serde::{Deserialize, Serialize};

/// Top-level discriminated union carried by every frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Envelope {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
    Signal(SignalEnvelope),
}

/// Methods the host may ask the workload to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    ToolInvoke,
    Custom,
    Transform,
    Input,
    Speak,
    Record,
    StreamCtrl,
}

/// Out-of-band notifications that aren't paired with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    Terminate,
    StreamData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u32,
    pub method: Method,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u32,
    pub code: i32,
    pub message: Option<String>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub signal: Signal,
    pub payload: Vec<u8>,
}

/// `Custom` request body. `request_info`'s variant decides whether the
/// bound handler must be a streaming or non-streaming one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRequest {
    pub method: String,
    pub request_info: RequestInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestInfo {
    Normal(NormalRequestInfo),
    Streaming(StreamingRequestInfo),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalRequestInfo {
    pub params_str: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingRequestInfo {
    pub params_str: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomResponse {
    pub data: String,
}

/// `ToolInvoke` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    pub tool_info: InternalToolInfo,
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InternalToolInfo {
    pub tool_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationResponse {
    pub result: String,
}

/// `StreamCtrl` request/response bodies, used internally by the stream
/// layer to open and close host-assigned logical streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamCtrlOp {
    New,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamCtrlRequest {
    pub op: StreamCtrlOp,
    pub request_id: u32,
    pub class_name: Option<String>,
    pub stream_id: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamCtrlResponsePayload {
    pub request_id: u32,
    pub stream_id: u32,
}

/// Payload of a `Signal::StreamData` signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamData {
    pub stream_id: u32,
    pub sequence_id: u32,
    pub is_final: bool,
    pub variant: StreamEventVariant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEventVariant {
    RawData(Vec<u8>),
    OperationEvent {
        name: String,
        op: OperationType,
        data: Vec<u8>,
    },
    NotificationEvent {
        name: String,
        kind: NotificationEventType,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Append,
    Close,
    Flush,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationEventType {
    Created,
    Configured,
    Updated,
    Completed,
    Error,
}

/// Stream id reserved for host-assigned system I/O; `create_stream` must
/// never hand this id out and a peer trying to claim it is a protocol error.
pub const SYS_IO_STREAM_ID: u32 = 0;

//! Error types for the runtime.
//!
//! Mirrors the small, hand-rolled `Display`-by-hand error enums used
//! elsewhere in this codebase (`UnknownMethodId`, `DispatchError`) but
//! derives them with `thiserror` since these errors cross task
//! boundaries and are surfaced directly to library callers.

/// JSON-RPC-style error codes carried in [`crate::envelope::ResponseEnvelope::code`].
pub mod error_code {
    /// Inflight cap reached; the request was rejected without running a handler.
    pub const TOO_MANY_REQUESTS: i32 = -32000;
    /// No handler registered for the requested method, or a streaming/non-streaming mismatch.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// A handler returned an error, panicked, or a tool invocation failed.
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Errors from the framed transport layer (handshake, socket I/O, frame shape).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the connection (EOF or an explicit zero-length terminator).
    #[error("transport closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("frame payload of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u64, max: usize },
    #[error("frame decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("frame encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("send queue closed")]
    QueueClosed,
}

/// Errors decoding bytes into an [`crate::envelope::Envelope`] or inner payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] postcard::Error),
}

/// Errors encoding an [`crate::envelope::Envelope`] or inner payload into bytes.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to encode payload: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Errors from registering a handler against a table that already has one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("method {0:?} is already registered")]
    MethodAlreadyRegistered(String),
    #[error("tool id {0} is already registered")]
    ToolAlreadyRegistered(u32),
}

/// Violations of the envelope/method protocol by the peer, or by a reply that
/// doesn't match the request that provoked it.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("method {0:?} is not a valid inbound request method")]
    UnexpectedInboundMethod(crate::envelope::Method),
    #[error("stream control reply request_id mismatch: expected {expected}, got {got}")]
    RequestIdMismatch { expected: u32, got: u32 },
    #[error("stream control reply stream_id mismatch: expected {expected}, got {got}")]
    StreamIdMismatch { expected: u32, got: u32 },
    #[error("host returned invalid stream_id 0")]
    InvalidStreamId,
}

/// Top-level error returned to library callers.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("rpc error (code {code}): {message}")]
    Rpc { code: i32, message: String },
    #[error("runtime is shutting down")]
    ShuttingDown,
}

impl From<DecodeError> for RuntimeError {
    fn from(e: DecodeError) -> Self {
        RuntimeError::Transport(TransportError::Decode(e))
    }
}

impl From<EncodeError> for RuntimeError {
    fn from(e: EncodeError) -> Self {
        RuntimeError::Rpc {
            code: error_code::INTERNAL_ERROR,
            message: e.to_string(),
        }
    }
}

//! A framed, multiplexed RPC runtime for a workload process talking to
//! a controlling host over a single TCP connection.
//!
//! The host issues `ToolInvoke`/`Custom` requests to the workload; the
//! workload issues `Transform`/`Input`/`Speak`/`Record`/`StreamCtrl`
//! requests to the host. Either side may also emit out-of-band signals
//! (`Terminate`, `StreamData`). See [`Runtime`] for the entry point.

pub mod codec;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod stream;
pub mod transport;

pub use config::{ConfigError, RuntimeConfig};
pub use context::{
    RawStreamContext, RequestContext, SignalContext, StreamEventContext, StreamEventKind, ToolContext,
};
pub use envelope::{
    Method, NotificationEventType, OperationType, Signal, SYS_IO_STREAM_ID,
};
pub use error::{DecodeError, EncodeError, ProtocolError, RegistryError, RuntimeError, TransportError};
pub use registry::HandlerRegistry;
pub use runtime::Runtime;
pub use stream::StreamLayer;

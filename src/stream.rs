//! Logical stream lifecycle and outbound stream events.
//!
//! Stream ids are assigned by the host in response to `StreamCtrl`
//! requests; this layer tracks the monotonic per-stream sequence
//! counter and builds the `Signal::StreamData` envelopes, using the
//! same request/reply shape `exec_request` already provides for every
//! other outbound call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use crate::codec::{decode_payload, encode_payload};
use crate::dispatch::Dispatcher;
use crate::envelope::{
    Envelope, Method, NotificationEventType, OperationType, Signal, SignalEnvelope, StreamCtrlOp,
    StreamCtrlRequest, StreamCtrlResponsePayload, StreamData, StreamEventVariant, SYS_IO_STREAM_ID,
};
use crate::error::{ProtocolError, RuntimeError};
use crate::registry::HandlerRegistry;

pub struct StreamLayer {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<HandlerRegistry>,
    sequence_ids: Mutex<HashMap<u32, u32>>,
}

/// A random, positive 31-bit id for a `StreamCtrl` round trip. Random
/// rather than a counter so concurrent `create_stream`/`close_stream`
/// calls from independent callers don't need to coordinate.
fn random_ctrl_request_id() -> u32 {
    loop {
        let id = rand::thread_rng().gen::<u32>() & 0x7fff_ffff;
        if id != 0 {
            return id;
        }
    }
}

impl StreamLayer {
    pub fn new(dispatcher: Arc<Dispatcher>, registry: Arc<HandlerRegistry>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            registry,
            sequence_ids: Mutex::new(HashMap::new()),
        })
    }

    /// Asks the host to open a new logical stream of class `class_name`,
    /// registers `handler` against the stream id the host assigns, and
    /// returns that id (always greater than [`SYS_IO_STREAM_ID`]).
    pub async fn create_stream<F, Fut>(
        &self,
        class_name: impl Into<String>,
        handler: F,
    ) -> Result<u32, RuntimeError>
    where
        F: Fn(crate::context::SignalContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let request_id = random_ctrl_request_id();
        let req = StreamCtrlRequest {
            op: StreamCtrlOp::New,
            request_id,
            class_name: Some(class_name.into()),
            stream_id: None,
        };
        let payload = encode_payload(&req)?;
        let reply_bytes = self.dispatcher.exec_request(Method::StreamCtrl, payload).await?;
        let reply: StreamCtrlResponsePayload = decode_payload(&reply_bytes)?;

        if reply.request_id != request_id {
            return Err(ProtocolError::RequestIdMismatch {
                expected: request_id,
                got: reply.request_id,
            }
            .into());
        }
        if reply.stream_id == SYS_IO_STREAM_ID {
            return Err(ProtocolError::InvalidStreamId.into());
        }

        self.sequence_ids.lock().insert(reply.stream_id, 0);
        self.registry.register_stream_handler(reply.stream_id, handler);
        Ok(reply.stream_id)
    }

    /// Asks the host to close `stream_id`. The sequence counter and any
    /// registered stream handler for it are dropped regardless of
    /// whether the host accepts the close.
    pub async fn close_stream(&self, stream_id: u32) -> Result<(), RuntimeError> {
        let request_id = random_ctrl_request_id();
        let req = StreamCtrlRequest {
            op: StreamCtrlOp::Close,
            request_id,
            class_name: None,
            stream_id: Some(stream_id),
        };
        let payload = encode_payload(&req)?;
        let result = self.dispatcher.exec_request(Method::StreamCtrl, payload).await;

        self.sequence_ids.lock().remove(&stream_id);
        self.registry.unregister_stream_handler(stream_id);

        let reply_bytes = result?;
        let reply: StreamCtrlResponsePayload = decode_payload(&reply_bytes)?;
        if reply.request_id != request_id {
            return Err(ProtocolError::RequestIdMismatch {
                expected: request_id,
                got: reply.request_id,
            }
            .into());
        }
        if reply.stream_id != stream_id {
            return Err(ProtocolError::StreamIdMismatch {
                expected: stream_id,
                got: reply.stream_id,
            }
            .into());
        }
        Ok(())
    }

    /// Sends opaque bytes on `stream_id`.
    pub async fn send_raw(&self, stream_id: u32, data: Vec<u8>, is_final: bool) -> Result<(), RuntimeError> {
        self.send_variant(stream_id, is_final, StreamEventVariant::RawData(data)).await
    }

    /// Sends a named operation event on `stream_id`.
    pub async fn send_operation(
        &self,
        stream_id: u32,
        name: impl Into<String>,
        op: OperationType,
        data: Vec<u8>,
        is_final: bool,
    ) -> Result<(), RuntimeError> {
        self.send_variant(
            stream_id,
            is_final,
            StreamEventVariant::OperationEvent {
                name: name.into(),
                op,
                data,
            },
        )
        .await
    }

    /// Sends a named notification event on `stream_id`.
    pub async fn send_notification(
        &self,
        stream_id: u32,
        name: impl Into<String>,
        kind: NotificationEventType,
        data: Vec<u8>,
        is_final: bool,
    ) -> Result<(), RuntimeError> {
        self.send_variant(
            stream_id,
            is_final,
            StreamEventVariant::NotificationEvent {
                name: name.into(),
                kind,
                data,
            },
        )
        .await
    }

    async fn send_variant(
        &self,
        stream_id: u32,
        is_final: bool,
        variant: StreamEventVariant,
    ) -> Result<(), RuntimeError> {
        let sequence_id = {
            let mut ids = self.sequence_ids.lock();
            let counter = ids.entry(stream_id).or_insert(0);
            let seq = *counter;
            *counter += 1;
            seq
        };
        let data = StreamData {
            stream_id,
            sequence_id,
            is_final,
            variant,
        };
        let payload = encode_payload(&data)?;
        let env = Envelope::Signal(SignalEnvelope {
            signal: Signal::StreamData,
            payload,
        });
        self.dispatcher_send(env).await
    }

    async fn dispatcher_send(&self, env: Envelope) -> Result<(), RuntimeError> {
        self.dispatcher.send_signal(env).await
    }
}

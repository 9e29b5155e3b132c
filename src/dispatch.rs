//! Request/response pairing and the inbound-request worker pool.
//!
//! The dispatcher never blocks on user code: each inbound `Request` gets
//! its own ephemeral task, and a handler panic is caught at that task's
//! boundary and turned into an internal-error response rather than
//! taking the whole connection down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::warn;

use crate::codec::{decode_payload, encode_payload};
use crate::context::{
    RawStreamContext, RequestContext, SignalContext, StreamEventContext, StreamEventKind,
    ToolContext,
};
use crate::envelope::{
    CustomRequest, CustomResponse, Envelope, Method, RequestEnvelope, RequestInfo,
    ResponseEnvelope, Signal, SignalEnvelope, StreamData, StreamEventVariant,
    ToolInvocationRequest, ToolInvocationResponse,
};
use crate::error::{error_code, RuntimeError};
use crate::registry::HandlerRegistry;
use crate::transport::TransportHandle;

pub struct Dispatcher {
    transport: TransportHandle,
    registry: Arc<HandlerRegistry>,
    pending: Mutex<HashMap<u32, oneshot::Sender<ResponseEnvelope>>>,
    next_id: AtomicU32,
    inflight: AtomicUsize,
    max_inflight: usize,
    drain_notify: Notify,
}

impl Dispatcher {
    pub fn new(transport: TransportHandle, registry: Arc<HandlerRegistry>, max_inflight: usize) -> Arc<Self> {
        Arc::new(Self {
            transport,
            registry,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
            inflight: AtomicUsize::new(0),
            max_inflight,
            drain_notify: Notify::new(),
        })
    }

    /// Sends a `Request` envelope and waits for its paired `Response`.
    /// Used both by the public "call the host" API and by the stream
    /// layer to open/close streams via `StreamCtrl`.
    pub async fn exec_request(&self, method: Method, payload: Vec<u8>) -> Result<Vec<u8>, RuntimeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let env = Envelope::Request(RequestEnvelope { id, method, payload });
        if let Err(e) = self.transport.send(env).await {
            self.pending.lock().remove(&id);
            return Err(e.into());
        }

        let resp = rx.await.map_err(|_| RuntimeError::ShuttingDown)?;
        if resp.code != 0 {
            return Err(RuntimeError::Rpc {
                code: resp.code,
                message: resp.message.unwrap_or_default(),
            });
        }
        Ok(resp.payload)
    }

    /// Dispatches one inbound envelope. Never awaits user code directly.
    pub async fn handle_envelope(self: &Arc<Self>, env: Envelope) {
        match env {
            Envelope::Request(req) => self.handle_inbound_request(req).await,
            Envelope::Response(resp) => self.handle_inbound_response(resp),
            Envelope::Signal(sig) => self.handle_inbound_signal(sig).await,
        }
    }

    async fn handle_inbound_request(self: &Arc<Self>, req: RequestEnvelope) {
        match req.method {
            Method::ToolInvoke | Method::Custom => {}
            other => {
                let err = crate::error::ProtocolError::UnexpectedInboundMethod(other);
                tracing::error!(error = %err, "protocol violation on inbound request, closing connection");
                self.respond_error(req.id, error_code::METHOD_NOT_FOUND, err.to_string())
                    .await;
                self.transport.request_shutdown();
                return;
            }
        }

        let prev = self.inflight.fetch_add(1, Ordering::AcqRel);
        if prev >= self.max_inflight {
            self.release_inflight_slot();
            self.respond_error(
                req.id,
                error_code::TOO_MANY_REQUESTS,
                "too many in-flight requests".to_string(),
            )
            .await;
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let id = req.id;
            let method = req.method;
            let payload = req.payload;
            let worker = Arc::clone(&this);
            let join = tokio::spawn(async move { worker.run_inbound_request(method, &payload).await });

            match join.await {
                Ok(Ok(bytes)) => this.respond_ok(id, bytes).await,
                Ok(Err((code, message))) => this.respond_error(id, code, message).await,
                Err(_join_error) => {
                    this.respond_error(id, error_code::INTERNAL_ERROR, "handler panicked".to_string())
                        .await
                }
            }
            this.release_inflight_slot();
        });
    }

    fn release_inflight_slot(&self) {
        let prev = self.inflight.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            self.drain_notify.notify_waiters();
        }
    }

    async fn run_inbound_request(&self, method: Method, payload: &[u8]) -> Result<Vec<u8>, (i32, String)> {
        match method {
            Method::Custom => self.run_custom(payload).await,
            Method::ToolInvoke => self.run_tool_invoke(payload).await,
            _ => unreachable!("filtered out before the request reached a worker"),
        }
    }

    async fn run_custom(&self, payload: &[u8]) -> Result<Vec<u8>, (i32, String)> {
        let req: CustomRequest =
            decode_payload(payload).map_err(|e| (error_code::INTERNAL_ERROR, e.to_string()))?;
        let (streaming, params_str) = match req.request_info {
            RequestInfo::Normal(info) => (false, info.params_str),
            RequestInfo::Streaming(info) => (true, info.params_str),
        };

        let Some((handler_streaming, handler)) = self.registry.lookup_method(&req.method) else {
            return Err((
                error_code::METHOD_NOT_FOUND,
                "Method not found".to_string(),
            ));
        };
        if handler_streaming != streaming {
            return Err((error_code::METHOD_NOT_FOUND, "invalid request type".to_string()));
        }

        let ctx = RequestContext {
            method: req.method,
            params: params_str,
            streaming,
        };
        let data = handler(ctx)
            .await
            .map_err(|e| (error_code::INTERNAL_ERROR, e.to_string()))?;
        encode_payload(&CustomResponse { data }).map_err(|e| (error_code::INTERNAL_ERROR, e.to_string()))
    }

    async fn run_tool_invoke(&self, payload: &[u8]) -> Result<Vec<u8>, (i32, String)> {
        let req: ToolInvocationRequest =
            decode_payload(payload).map_err(|e| (error_code::INTERNAL_ERROR, e.to_string()))?;
        let Some(handler) = self.registry.lookup_tool(req.tool_info.tool_id) else {
            return Err((
                error_code::INTERNAL_ERROR,
                format!("no tool registered for id {}", req.tool_info.tool_id),
            ));
        };
        let ctx = ToolContext {
            tool_id: req.tool_info.tool_id,
            params: req.params,
        };
        let result = handler(ctx)
            .await
            .map_err(|e| (error_code::INTERNAL_ERROR, e.to_string()))?;
        encode_payload(&ToolInvocationResponse { result })
            .map_err(|e| (error_code::INTERNAL_ERROR, e.to_string()))
    }

    fn handle_inbound_response(&self, resp: ResponseEnvelope) {
        if let Some(tx) = self.pending.lock().remove(&resp.id) {
            let _ = tx.send(resp);
        } else {
            warn!(id = resp.id, "response for unknown or already-completed request");
        }
    }

    async fn handle_inbound_signal(self: &Arc<Self>, sig: SignalEnvelope) {
        match sig.signal {
            Signal::Terminate => {
                for handler in self.registry.signal_handlers(Signal::Terminate) {
                    handler(SignalContext::Terminate).await;
                }
            }
            Signal::StreamData => {
                let data: StreamData = match decode_payload(&sig.payload) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed stream data signal");
                        return;
                    }
                };
                let ctx = stream_event_context(data);

                if let Some(handler) = self.registry.lookup_stream_handler(stream_id_of(&ctx)) {
                    handler(ctx.clone()).await;
                }
                for handler in self.registry.signal_handlers(Signal::StreamData) {
                    handler(ctx.clone()).await;
                }
            }
        }
    }

    async fn respond_ok(&self, id: u32, payload: Vec<u8>) {
        let env = Envelope::Response(ResponseEnvelope {
            id,
            code: 0,
            message: None,
            payload,
        });
        if let Err(e) = self.transport.send(env).await {
            warn!(error = %e, "failed to send response");
        }
    }

    async fn respond_error(&self, id: u32, code: i32, message: String) {
        let env = Envelope::Response(ResponseEnvelope {
            id,
            code,
            message: Some(message),
            payload: Vec::new(),
        });
        if let Err(e) = self.transport.send(env).await {
            warn!(error = %e, "failed to send error response");
        }
    }

    /// Resolves once no inbound request worker is running. Used during
    /// shutdown to make sure the terminator frame is the last thing
    /// sent.
    pub async fn wait_for_drain(&self) {
        loop {
            let notified = self.drain_notify.notified();
            if self.inflight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Sends a signal envelope (e.g. outbound `StreamData`) without
    /// expecting a reply.
    pub async fn send_signal(&self, env: Envelope) -> Result<(), RuntimeError> {
        self.transport.send(env).await.map_err(Into::into)
    }

    /// Fails every outstanding outbound request; used when the
    /// connection goes away with calls still pending a reply.
    pub fn fail_all_pending(&self, code: i32, message: &str) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (id, tx) in pending {
            let _ = tx.send(ResponseEnvelope {
                id,
                code,
                message: Some(message.to_string()),
                payload: Vec::new(),
            });
        }
    }
}

fn stream_id_of(ctx: &SignalContext) -> u32 {
    match ctx {
        SignalContext::StreamRaw(raw) => raw.stream_id,
        SignalContext::StreamEvent(evt) => evt.stream_id,
        SignalContext::Terminate => 0,
    }
}

fn stream_event_context(data: StreamData) -> SignalContext {
    match data.variant {
        StreamEventVariant::RawData(bytes) => SignalContext::StreamRaw(RawStreamContext {
            stream_id: data.stream_id,
            sequence_id: data.sequence_id,
            is_final: data.is_final,
            data: bytes,
        }),
        StreamEventVariant::OperationEvent { name, op, data: bytes } => {
            SignalContext::StreamEvent(StreamEventContext {
                stream_id: data.stream_id,
                sequence_id: data.sequence_id,
                is_final: data.is_final,
                name,
                kind: StreamEventKind::Operation(op),
                data: bytes,
            })
        }
        StreamEventVariant::NotificationEvent { name, kind, data: bytes } => {
            SignalContext::StreamEvent(StreamEventContext {
                stream_id: data.stream_id,
                sequence_id: data.sequence_id,
                is_final: data.is_final,
                name,
                kind: StreamEventKind::Notification(kind),
                data: bytes,
            })
        }
    }
}

//! Ties the transport, registry, dispatcher, and stream layer together
//! into the object a workload process actually constructs and runs.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, info_span};
use tracing::Instrument;

use crate::config::RuntimeConfig;
use crate::dispatch::Dispatcher;
use crate::envelope::{Envelope, Method, Signal};
use crate::error::{error_code, RuntimeError};
use crate::registry::HandlerRegistry;
use crate::stream::StreamLayer;
use crate::transport::{self, TransportHandle};

/// A connected host-agent runtime. Construct with [`Runtime::connect`],
/// register method/tool/signal handlers through [`Runtime::registry`],
/// then drive it with [`Runtime::run`].
pub struct Runtime {
    transport: TransportHandle,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<HandlerRegistry>,
    streams: Arc<StreamLayer>,
    inbound: Mutex<Option<mpsc::Receiver<Envelope>>>,
}

impl Runtime {
    /// Connects to the host at `config.service_addr`, performs the
    /// secret handshake, and starts the sender/receiver tasks. Handlers
    /// may be registered immediately; no inbound envelope is processed
    /// until [`Runtime::run`] is called.
    pub async fn connect(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let stream = transport::connect(&config).await?;
        let (handle, inbound_rx) = TransportHandle::spawn(stream, &config);

        let registry = HandlerRegistry::new();
        let dispatcher = Dispatcher::new(handle.clone(), registry.clone(), config.max_inflight_requests);
        let streams = StreamLayer::new(dispatcher.clone(), registry.clone());

        info!(addr = %config.service_addr, "connected");
        Ok(Self {
            transport: handle,
            dispatcher,
            registry,
            streams,
            inbound: Mutex::new(Some(inbound_rx)),
        })
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn streams(&self) -> &Arc<StreamLayer> {
        &self.streams
    }

    /// Sends an outbound request (`Transform`, `Input`, `Speak`,
    /// `Record`, or a workload-initiated `Custom`/`ToolInvoke` call) and
    /// waits for the paired response.
    pub async fn exec_request(&self, method: Method, payload: Vec<u8>) -> Result<Vec<u8>, RuntimeError> {
        self.dispatcher.exec_request(method, payload).await
    }

    /// Drives the dispatch loop. Returns once the connection is closed,
    /// either because the peer sent a `Terminate` signal or the socket
    /// went away. Safe to call exactly once.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let mut inbound = self
            .inbound
            .lock()
            .take()
            .expect("Runtime::run called more than once");

        let span = info_span!("runtime");
        info!("dispatch loop starting");
        async {
            while let Some(env) = inbound.recv().await {
                let is_terminate = matches!(&env, Envelope::Signal(sig) if sig.signal == Signal::Terminate);
                self.dispatcher.handle_envelope(env).await;
                if is_terminate {
                    break;
                }
            }
        }
        .instrument(span)
        .await;

        self.dispatcher.wait_for_drain().await;
        self.transport.request_shutdown();
        self.transport.wait_closed().await;
        self.dispatcher
            .fail_all_pending(error_code::INTERNAL_ERROR, "runtime shut down");
        Ok(())
    }

    /// Requests a graceful shutdown from the workload side: outstanding
    /// inbound work is allowed to finish, then the terminator frame is
    /// sent and the connection closes. [`Runtime::run`] returns once
    /// this completes.
    pub fn stop(&self) {
        self.transport.request_shutdown();
    }
}

//! Framed TCP transport.
//!
//! Owns the socket. After the handshake the connection is split into a
//! sender task (the only task allowed to write) and a receiver task (the
//! only task allowed to read), exactly as the dispatcher expects: no
//! other code ever touches the socket directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::codec::{self, PostcardCodec, WireCodec};
use crate::config::RuntimeConfig;
use crate::envelope::Envelope;
use crate::error::TransportError;

/// Performs the TCP handshake: connect, then write the 8-byte
/// little-endian secret before handing the stream off to the async
/// sender/receiver tasks.
pub async fn connect(config: &RuntimeConfig) -> Result<TcpStream, TransportError> {
    let mut stream = TcpStream::connect(&config.service_addr)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    stream
        .write_all(&config.secret.to_le_bytes())
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    stream.set_nodelay(true).ok();
    info!(addr = %config.service_addr, "handshake complete");
    Ok(stream)
}

/// A live connection's sending half: enqueue envelopes, request a
/// graceful shutdown, or find out whether the peer has gone away.
#[derive(Clone)]
pub struct TransportHandle {
    outbound: mpsc::Sender<Envelope>,
    sender_done: Arc<AtomicBool>,
    receiver_done: Arc<AtomicBool>,
    closed_notify: Arc<Notify>,
    sender_shutdown: Arc<Notify>,
    receiver_shutdown: Arc<Notify>,
}

impl TransportHandle {
    /// Splits `stream`, starts the sender and receiver tasks, and
    /// returns a handle plus the channel of decoded inbound envelopes.
    pub fn spawn(stream: TcpStream, config: &RuntimeConfig) -> (Self, mpsc::Receiver<Envelope>) {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.send_queue_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.send_queue_capacity);
        let sender_done = Arc::new(AtomicBool::new(false));
        let receiver_done = Arc::new(AtomicBool::new(false));
        let closed_notify = Arc::new(Notify::new());
        // Each task gets its own `Notify` rather than sharing one: a
        // `notify_one()` call stores a permit for whichever task hasn't
        // started waiting yet, so a shutdown requested before a task's
        // first poll is never lost the way it would be with
        // `notify_waiters()` on a single shared instance.
        let sender_shutdown = Arc::new(Notify::new());
        let receiver_shutdown = Arc::new(Notify::new());

        tokio::spawn(sender_task(
            writer,
            outbound_rx,
            sender_shutdown.clone(),
            sender_done.clone(),
            closed_notify.clone(),
        ));
        tokio::spawn(receiver_task(
            reader,
            inbound_tx,
            receiver_shutdown.clone(),
            sender_shutdown.clone(),
            receiver_done.clone(),
            closed_notify.clone(),
            config.max_frame_payload_size,
        ));

        (
            TransportHandle {
                outbound: outbound_tx,
                sender_done,
                receiver_done,
                closed_notify,
                sender_shutdown,
                receiver_shutdown,
            },
            inbound_rx,
        )
    }

    /// Enqueues an envelope for the sender task. Blocks (without holding
    /// any lock) while the outbound queue is full, providing natural
    /// backpressure to callers.
    pub async fn send(&self, env: Envelope) -> Result<(), TransportError> {
        self.outbound
            .send(env)
            .await
            .map_err(|_| TransportError::QueueClosed)
    }

    /// Requests a graceful shutdown: the sender task drains whatever is
    /// already queued and writes the zero-length terminator, and the
    /// receiver task stops reading, both woken independently.
    pub fn request_shutdown(&self) {
        info!("shutdown requested");
        self.sender_shutdown.notify_one();
        self.receiver_shutdown.notify_one();
    }

    /// Resolves once both the sender and receiver tasks have exited.
    pub async fn wait_closed(&self) {
        loop {
            let notified = self.closed_notify.notified();
            if self.is_closed() {
                info!("shutdown complete");
                return;
            }
            notified.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender_done.load(Ordering::Acquire) && self.receiver_done.load(Ordering::Acquire)
    }
}

async fn sender_task(
    mut writer: WriteHalf<TcpStream>,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    shutdown: Arc<Notify>,
    sender_done: Arc<AtomicBool>,
    closed_notify: Arc<Notify>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => {
                outbound_rx.close();
                while let Ok(env) = outbound_rx.try_recv() {
                    if write_one(&mut writer, &env).await.is_err() {
                        break;
                    }
                }
                let _ = codec::write_terminator(&mut writer).await;
                break;
            }
            maybe_env = outbound_rx.recv() => {
                match maybe_env {
                    Some(env) => {
                        if write_one(&mut writer, &env).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    sender_done.store(true, Ordering::Release);
    closed_notify.notify_waiters();
}

async fn write_one(writer: &mut WriteHalf<TcpStream>, env: &Envelope) -> Result<(), TransportError> {
    let body = PostcardCodec::encode_envelope(env)?;
    debug!(bytes = body.len(), "writing frame");
    codec::write_frame(writer, &body).await
}

async fn receiver_task(
    mut reader: ReadHalf<TcpStream>,
    inbound_tx: mpsc::Sender<Envelope>,
    own_shutdown: Arc<Notify>,
    sender_shutdown: Arc<Notify>,
    receiver_done: Arc<AtomicBool>,
    closed_notify: Arc<Notify>,
    max_frame_payload_size: usize,
) {
    loop {
        tokio::select! {
            biased;
            _ = own_shutdown.notified() => {
                debug!("receiver woken by shutdown signal");
                break;
            }
            frame = codec::read_frame(&mut reader, max_frame_payload_size) => {
                match frame {
                    Ok(None) => {
                        debug!("received shutdown terminator");
                        break;
                    }
                    Ok(Some(body)) => match PostcardCodec::decode_envelope(&body) {
                        Ok(env) => {
                            if inbound_tx.send(env).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "malformed envelope, closing connection");
                            sender_shutdown.notify_one();
                            break;
                        }
                    },
                    Err(TransportError::Closed) => {
                        debug!("peer closed the connection");
                        sender_shutdown.notify_one();
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport read failed, closing");
                        sender_shutdown.notify_one();
                        break;
                    }
                }
            }
        }
    }
    receiver_done.store(true, Ordering::Release);
    closed_notify.notify_waiters();
}

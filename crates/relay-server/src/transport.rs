use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use relay_core::{Connection, ConnectionId, Frame, FrameSource, ReadError, SendError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Timing and queue limits for one socket.
#[derive(Clone, Copy, Debug)]
pub struct TransportLimits {
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    /// Close the socket when no pong arrives for this long.
    pub client_timeout: Duration,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
        }
    }
}

/// Outbound half of an upgraded WebSocket.
///
/// `send` only enqueues; a writer task drains the queue to the socket.
pub struct WsConnection {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    closed: AtomicBool,
    last_pong: AtomicU64,
    shutdown: CancellationToken,
}

impl WsConnection {
    fn new(tx: mpsc::Sender<String>, shutdown: CancellationToken) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
            closed: AtomicBool::new(false),
            last_pong: AtomicU64::new(now_secs()),
            shutdown,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }
}

impl Connection for WsConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, payload: &str) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        match self.tx.try_send(payload.to_owned()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    msg_len = msg.len(),
                    "send queue full"
                );
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(connection_id = %self.id, "closing connection");
            self.shutdown.cancel();
        }
    }
}

/// Inbound half of an upgraded WebSocket.
pub struct WsFrameSource {
    stream: SplitStream<WebSocket>,
    connection: Arc<WsConnection>,
    shutdown: CancellationToken,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> Result<Frame, ReadError> {
        let next = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(ReadError::Closed),
            next = self.stream.next() => next,
        };

        match next {
            Some(Ok(WsMessage::Text(text))) => Ok(Frame::Text(text.to_string())),
            Some(Ok(WsMessage::Binary(bytes))) => Ok(Frame::Binary(bytes.to_vec())),
            Some(Ok(WsMessage::Pong(_))) => {
                self.connection.record_pong();
                Ok(Frame::Control)
            }
            // axum answers pings itself
            Some(Ok(WsMessage::Ping(_))) => Ok(Frame::Control),
            Some(Ok(WsMessage::Close(_))) | None => Err(ReadError::Closed),
            Some(Err(e)) => Err(ReadError::Transport(e.to_string())),
        }
    }
}

/// Split an upgraded socket into a connection handle, a frame source and
/// the writer task that owns the sink.
pub fn attach(
    socket: WebSocket,
    limits: TransportLimits,
) -> (Arc<WsConnection>, WsFrameSource, JoinHandle<()>) {
    let (mut ws_tx, ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(limits.max_send_queue.max(1));
    let shutdown = CancellationToken::new();
    let connection = Arc::new(WsConnection::new(tx, shutdown.clone()));

    let writer_conn = Arc::clone(&connection);
    let writer_shutdown = shutdown.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(limits.heartbeat_interval);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                _ = writer_shutdown.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if !writer_conn.is_alive(limits.client_timeout) {
                        tracing::info!(connection_id = %writer_conn.id(), "no pong within timeout");
                        break;
                    }
                    if ws_tx.send(WsMessage::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_conn.id(), "sent ping");
                }
            }
        }

        // Writer gone: the reader must stop too.
        writer_conn.close();
    });

    let frames = WsFrameSource {
        stream: ws_rx,
        connection: Arc::clone(&connection),
        shutdown,
    };
    (connection, frames, writer)
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

//! WebSocket client for the relay server.
//!
//! `connect` performs the handshake, announces the peer with a PeerJoined
//! frame and spawns two tasks:
//!
//! - writer: drains the outgoing queue into the socket
//! - reader: pushes every binary frame into the inbound queue
//!
//! The returned [`WsTransport`] is the synchronous face of those queues, so a
//! [`ReplicationChannel`](crate::channel::ReplicationChannel) can drive it from
//! a frame loop without awaiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::channel::Transport;
use crate::protocol::{PeerInfo, ProtocolError, SyncMessage};

/// Frames buffered in each direction.
pub const QUEUE_CAPACITY: usize = 1024;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
}

pub struct SyncClient {
    peer_info: PeerInfo,
    board_id: Uuid,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: Option<mpsc::Sender<Arc<Vec<u8>>>>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    server_url: String,
}

impl SyncClient {
    pub fn new(peer_info: PeerInfo, board_id: Uuid, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(16);
        Self {
            peer_info,
            board_id,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect, join the board and hand back the frame transport.
    pub async fn connect(&mut self) -> Result<WsTransport, ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!("{}/{}", self.server_url, self.board_id);
        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {url}: {e}");
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let join = SyncMessage::peer_joined(self.peer_info.peer_id, self.board_id, &self.peer_info)
            .encode()?;
        if let Err(e) = ws_writer.send(Message::Binary(join.into())).await {
            log::warn!("Join handshake failed: {e}");
            *self.state.write().await = ConnectionState::Disconnected;
            return Err(ProtocolError::ConnectionClosed);
        }

        let open = Arc::new(AtomicBool::new(true));

        // Writer task: forward outgoing queue to the socket
        let (out_tx, mut out_rx) = mpsc::channel::<Arc<Vec<u8>>>(QUEUE_CAPACITY);
        let writer_open = open.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let data = Arc::unwrap_or_clone(frame);
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            writer_open.store(false, Ordering::Release);
            let _ = ws_writer.close().await;
        });

        // Reader task: forward binary frames to the inbound queue
        let (in_tx, in_rx) = mpsc::channel::<Arc<Vec<u8>>>(QUEUE_CAPACITY);
        let reader_open = open.clone();
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        if in_tx.send(Arc::new(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            reader_open.store(false, Ordering::Release);
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.try_send(SyncEvent::Disconnected);
            log::info!("Disconnected from relay");
        });

        self.outgoing_tx = Some(out_tx.clone());
        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.try_send(SyncEvent::Connected);
        log::info!(
            "Connected to {} as {} ({})",
            self.server_url,
            self.peer_info.name,
            self.peer_info.peer_id
        );

        Ok(WsTransport {
            outgoing: out_tx,
            incoming: in_rx,
            open,
        })
    }

    /// Send a ping to the server.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        let msg = SyncMessage::ping(self.peer_info.peer_id);
        let encoded = msg.encode()?;

        if let Some(ref tx) = self.outgoing_tx {
            tx.send(Arc::new(encoded))
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Stop sending. The socket closes once every transport handle is
    /// dropped too.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn peer_info(&self) -> &PeerInfo {
        &self.peer_info
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

/// Frame queues of a connected [`SyncClient`].
pub struct WsTransport {
    outgoing: mpsc::Sender<Arc<Vec<u8>>>,
    incoming: mpsc::Receiver<Arc<Vec<u8>>>,
    open: Arc<AtomicBool>,
}

impl Transport for WsTransport {
    /// Never waits: a full queue loses the frame.
    fn send(&mut self, frame: Arc<Vec<u8>>) -> Result<(), ProtocolError> {
        self.outgoing.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProtocolError::Timeout,
            mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
        })
    }

    fn poll(&mut self) -> Option<Arc<Vec<u8>>> {
        self.incoming.try_recv().ok()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outgoing.is_closed()
    }
}

//! WebSocket relay server with one room per board.
//!
//! Architecture:
//! ```text
//! Peer A ──┐                        ┌──► Peer A
//!          ├── Room (board_id) ─────┼──► Peer B
//! Peer B ──┘    BroadcastGroup      └──► Peer C
//! ```
//!
//! The server holds no whiteboard state. It checks that each frame decodes
//! and belongs to the sender's board, then rebroadcasts it to every peer in
//! the room, the sender included. Ordering across senders is whatever order
//! the frames reach the room.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, RoomManager};
use crate::protocol::{MessageType, PeerInfo, SyncMessage};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum peers per room
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// WebSocket keep-alive ping interval in seconds (0 disables)
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub relayed_frames: u64,
    pub rejected_frames: u64,
    pub refused_peers: u64,
    pub active_rooms: usize,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    room_manager: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

/// Per-connection context shared with the connection task.
#[derive(Clone)]
struct Shared {
    config: ServerConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let room_manager = Arc::new(RoomManager::new(
            config.broadcast_capacity,
            config.max_peers_per_room,
        ));
        Self {
            config,
            room_manager,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let shared = Shared {
                config: self.config.clone(),
                rooms: self.room_manager.clone(),
                stats: self.stats.clone(),
            };
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        shared: Shared,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = shared.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let heartbeat_period = match shared.config.heartbeat_interval_secs {
            0 => Duration::from_secs(24 * 60 * 60),
            secs => Duration::from_secs(secs),
        };
        let mut heartbeat = tokio::time::interval(heartbeat_period);
        heartbeat.tick().await;

        // Set once the peer has joined a room
        let mut joined: Option<(PeerInfo, Uuid, Arc<BroadcastGroup>)> = None;
        let mut broadcast_rx: Option<broadcast::Receiver<Arc<Vec<u8>>>> = None;

        let result = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            {
                                let mut s = shared.stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }
                            let sync_msg = match SyncMessage::decode(&bytes) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                    shared.stats.write().await.rejected_frames += 1;
                                    continue;
                                }
                            };

                            if joined.is_none() {
                                if sync_msg.msg_type != MessageType::PeerJoined {
                                    log::warn!(
                                        "{:?} from {addr} before joining a board",
                                        sync_msg.msg_type
                                    );
                                    shared.stats.write().await.rejected_frames += 1;
                                    continue;
                                }
                                let info = sync_msg.peer_info().unwrap_or_else(|_| {
                                    PeerInfo::with_id(sync_msg.peer_id, "Anonymous")
                                });
                                let Some(admission) =
                                    shared.rooms.admit(sync_msg.board_id, info.clone()).await
                                else {
                                    log::warn!(
                                        "Board {} is full, refusing {}",
                                        sync_msg.board_id,
                                        info.peer_id
                                    );
                                    shared.stats.write().await.refused_peers += 1;
                                    let _ = ws_sender.send(Message::Close(None)).await;
                                    break Ok(());
                                };
                                let room = admission.room;
                                broadcast_rx = Some(admission.frames);
                                room.broadcast_raw(Arc::new(bytes));
                                let room_count = shared.rooms.room_count().await;
                                shared.stats.write().await.active_rooms = room_count;
                                log::info!(
                                    "Peer {} ({}) joined board {}",
                                    info.name,
                                    info.peer_id,
                                    sync_msg.board_id
                                );
                                joined = Some((info, sync_msg.board_id, room));
                                continue;
                            }
                            let Some((info, board_id, room)) = &joined else {
                                continue;
                            };

                            match sync_msg.msg_type {
                                MessageType::PeerLeft
                                    if sync_msg.peer_id == info.peer_id && sync_msg.board_id == *board_id =>
                                {
                                    // Announced to the room once the connection is torn down
                                    log::debug!("Peer {} is leaving board {}", info.peer_id, board_id);
                                    let _ = ws_sender.send(Message::Close(None)).await;
                                    break Ok(());
                                }
                                MessageType::Ping => {
                                    let pong = SyncMessage::pong(Uuid::nil()).encode()?;
                                    if let Err(e) = ws_sender.send(Message::Binary(pong.into())).await {
                                        break Err(e.into());
                                    }
                                }
                                msg_type => {
                                    let accepted = msg_type.is_board()
                                        && sync_msg.board_id == *board_id
                                        && sync_msg.peer_id == info.peer_id;
                                    if accepted {
                                        let receivers = room.broadcast_raw(Arc::new(bytes));
                                        log::trace!("Relayed {:?} to {} peer(s)", msg_type, receivers);
                                        shared.stats.write().await.relayed_frames += 1;
                                    } else {
                                        log::debug!(
                                            "Rejected {:?} from {} for board {}",
                                            msg_type,
                                            sync_msg.peer_id,
                                            sync_msg.board_id
                                        );
                                        shared.stats.write().await.rejected_frames += 1;
                                    }
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break Ok(());
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break Ok(());
                        }

                        _ => {}
                    }
                }

                // Frames relayed to this room, own frames included
                msg = async {
                    if let Some(ref mut rx) = broadcast_rx {
                        rx.recv().await
                    } else {
                        // Not joined yet, nothing to forward
                        std::future::pending().await
                    }
                } => {
                    match msg {
                        Ok(data) => {
                            if let Err(e) = ws_sender.send(Message::Binary(data.to_vec().into())).await {
                                break Err(e.into());
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Peer at {addr} lagged by {n} frames");
                            if let Some((_, _, room)) = &joined {
                                room.record_lag(n);
                            }
                        }
                        Err(_) => break Ok(()),
                    }
                }

                _ = heartbeat.tick(), if shared.config.heartbeat_interval_secs > 0 => {
                    if let Err(e) = ws_sender.send(Message::Ping(Vec::new().into())).await {
                        break Err(e.into());
                    }
                }
            }
        };

        if let Some((info, board_id, room)) = joined {
            let emptied = shared.rooms.depart(&board_id, &info.peer_id).await;
            let leave_msg = SyncMessage::peer_left(info.peer_id, board_id);
            let _ = room.broadcast(&leave_msg);
            log::info!("Peer {} ({}) left board {}", info.name, info.peer_id, board_id);
            if emptied {
                log::info!("Room {board_id} removed (empty)");
            }
        }

        let room_count = shared.rooms.room_count().await;
        {
            let mut s = shared.stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = room_count;
        }

        result
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get room manager reference.
    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.room_manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.max_peers_per_room, 100);
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.heartbeat_interval_secs, 30);
    }

    #[test]
    fn test_server_custom_config() {
        let config = ServerConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_peers_per_room: 50,
            broadcast_capacity: 512,
            heartbeat_interval_secs: 15,
        };
        let server = RelayServer::new(config);
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = RelayServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.relayed_frames, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(server.room_manager().room_count().await, 0);
        assert_eq!(server.room_manager().max_peers(), 100);
    }
}

//! Fan-out of encoded frames to every peer of a board.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers. Each peer
//! gets an independent receiver that buffers up to `capacity` frames; a peer
//! that falls further behind loses the oldest frames (reported as lag).
//!
//! The relay delivers to *every* subscriber, the sender included. Echo
//! filtering is the receiving channel's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{PeerInfo, ProtocolError, SyncMessage};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Lock-free counters for the hot path.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// A broadcast group for a single board room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    peers: Arc<RwLock<HashMap<Uuid, PeerInfo>>>,
    capacity: usize,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` is the number of frames buffered per peer before a lagging
    /// peer starts losing frames.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Add a peer to this broadcast group.
    ///
    /// Returns a receiver for this peer to consume frames.
    pub async fn add_peer(&self, info: PeerInfo) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut peers = self.peers.write().await;
        peers.insert(info.peer_id, info);
        self.sender.subscribe()
    }

    /// Remove a peer from this broadcast group.
    pub async fn remove_peer(&self, peer_id: &Uuid) -> Option<PeerInfo> {
        let mut peers = self.peers.write().await;
        peers.remove(peer_id)
    }

    /// Encode and broadcast a message to all subscribers.
    ///
    /// Returns the number of receivers that got the frame.
    pub fn broadcast(&self, msg: &SyncMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Broadcast pre-encoded bytes directly (zero-copy fast path).
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Account for frames a lagging receiver skipped.
    pub fn record_lag(&self, skipped: u64) {
        self.atomic_stats
            .messages_dropped
            .fetch_add(skipped, Ordering::Relaxed);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    /// Get broadcast statistics (lock-free counters + peer count).
    pub async fn stats(&self) -> BroadcastStats {
        let peers = self.peers.read().await;
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: peers.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe without registering peer metadata (in-process relays).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }
}

/// A peer admitted to a board room, with its subscription to the room.
pub struct Admission {
    pub room: Arc<BroadcastGroup>,
    pub frames: broadcast::Receiver<Arc<Vec<u8>>>,
}

/// Board rooms of a relay, with admission control.
///
/// Rooms are created by the first peer to join a board and dropped when the
/// last one leaves. Joining and leaving hold the room table lock, so the
/// peer limit holds under concurrent joins.
pub struct RoomManager {
    rooms: RwLock<HashMap<Uuid, Arc<BroadcastGroup>>>,
    capacity: usize,
    max_peers: usize,
}

impl RoomManager {
    /// `capacity` frames are buffered per peer; at most `max_peers` share a room.
    pub fn new(capacity: usize, max_peers: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity,
            max_peers,
        }
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Place `info` in the room for `board_id`. `None` if the room is full.
    pub async fn admit(&self, board_id: Uuid, info: PeerInfo) -> Option<Admission> {
        let mut rooms = self.rooms.write().await;
        let room = match rooms.get(&board_id) {
            Some(room) => room.clone(),
            None => Arc::new(BroadcastGroup::new(self.capacity)),
        };
        if room.peer_count().await >= self.max_peers {
            return None;
        }
        let frames = room.add_peer(info).await;
        rooms.entry(board_id).or_insert_with(|| room.clone());
        Some(Admission { room, frames })
    }

    /// Take `peer_id` out of its room. Returns true if that emptied and
    /// removed the room.
    pub async fn depart(&self, board_id: &Uuid, peer_id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(board_id) else {
            return false;
        };
        room.remove_peer(peer_id).await;
        if room.peer_count().await == 0 {
            rooms.remove(board_id);
            return true;
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

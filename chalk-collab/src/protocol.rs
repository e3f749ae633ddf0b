//! Binary protocol for whiteboard replication.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┬──────────┐
//! │ msg_type │ peer_id   │ board_id │ seq      │ payload  │
//! │ 1 byte   │ 16 bytes  │ 16 bytes │ varint   │ variable │
//! └──────────┴───────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! `seq` counts board messages per sender. Control frames (join, leave,
//! ping, pong) carry 0.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use chalk_core::{BoardMessage, Rgba};

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Stroke point or terminator
    Draw = 1,
    /// Marker colour change
    MarkerColor = 2,
    /// Marker pen width change
    PenSize = 3,
    /// Page switch
    PageChange = 4,
    /// Image pasted onto a page
    ImagePaste = 5,
    /// Peer joined notification
    PeerJoined = 6,
    /// Peer left notification
    PeerLeft = 7,
    /// Heartbeat ping
    Ping = 8,
    /// Heartbeat pong
    Pong = 9,
}

impl MessageType {
    /// Type tag for a board message.
    pub fn of(message: &BoardMessage) -> Self {
        match message {
            BoardMessage::Draw(_) => MessageType::Draw,
            BoardMessage::Color(_) => MessageType::MarkerColor,
            BoardMessage::PenSize(_) => MessageType::PenSize,
            BoardMessage::Page(_) => MessageType::PageChange,
            BoardMessage::Paste(_) => MessageType::ImagePaste,
        }
    }

    /// Whether frames of this type carry a [`BoardMessage`].
    pub fn is_board(&self) -> bool {
        (*self as u8) <= MessageType::ImagePaste as u8
    }
}

/// Peer identity with display metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    pub name: String,
    pub color: Rgba,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create with explicit peer_id (for testing)
    pub fn with_id(peer_id: Uuid, name: impl Into<String>) -> Self {
        // Stable color from peer_id hash
        let hash = peer_id.as_u128();
        Self {
            peer_id,
            name: name.into(),
            color: Rgba::rgb(hash as u8, (hash >> 8) as u8, (hash >> 16) as u8),
        }
    }
}

/// Top-level protocol message.
///
/// Typical draw frame: ~35 bytes header + ~15 bytes payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    pub board_id: Uuid,
    /// Per-sender sequence number of board messages
    pub seq: u64,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

impl SyncMessage {
    /// Wrap a board message; the type tag follows the variant.
    pub fn board(
        peer_id: Uuid,
        board_id: Uuid,
        seq: u64,
        message: &BoardMessage,
    ) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(message, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(Self {
            msg_type: MessageType::of(message),
            peer_id,
            board_id,
            seq,
            payload,
        })
    }

    /// Create a peer joined notification.
    pub fn peer_joined(peer_id: Uuid, board_id: Uuid, info: &PeerInfo) -> Self {
        let payload = bincode::serde::encode_to_vec(info, bincode::config::standard())
            .unwrap_or_default();
        Self {
            msg_type: MessageType::PeerJoined,
            peer_id,
            board_id,
            seq: 0,
            payload,
        }
    }

    /// Create a peer left notification.
    pub fn peer_left(peer_id: Uuid, board_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::PeerLeft,
            peer_id,
            board_id,
            seq: 0,
            payload: Vec::new(),
        }
    }

    /// Create a ping message.
    pub fn ping(peer_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Ping,
            peer_id,
            board_id: Uuid::nil(),
            seq: 0,
            payload: Vec::new(),
        }
    }

    /// Create a pong message.
    pub fn pong(peer_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Pong,
            peer_id,
            board_id: Uuid::nil(),
            seq: 0,
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse the board message payload. The decoded variant must match the
    /// type tag.
    pub fn board_message(&self) -> Result<BoardMessage, ProtocolError> {
        if !self.msg_type.is_board() {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (message, _): (BoardMessage, usize) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        if MessageType::of(&message) != self.msg_type {
            return Err(ProtocolError::InvalidMessageType);
        }
        Ok(message)
    }

    /// Parse peer info payload.
    pub fn peer_info(&self) -> Result<PeerInfo, ProtocolError> {
        if self.msg_type != MessageType::PeerJoined {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (info, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(info)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
    Timeout,
    /// Operation not allowed for this channel role
    WrongRole(&'static str),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
            Self::WrongRole(op) => write!(f, "{op} is not allowed for this role"),
        }
    }
}

impl std::error::Error for ProtocolError {}

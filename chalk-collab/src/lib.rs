//! # chalk-collab — Networked replication for chalk whiteboards
//!
//! Carries [`chalk_core::BoardMessage`]s between peers through a relay that
//! fans every frame out to the whole board, sender included.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   frames   ┌─────────────┐   frames   ┌──────────────┐
//! │ Replication  │ ─────────► │ Relay       │ ─────────► │ Replication  │
//! │ Channel      │            │ (server or  │            │ Channel      │
//! │ (client)     │ ◄───────── │  in-process)│ ─────────► │ (client)     │
//! └──────┬───────┘            └─────────────┘            └──────┬───────┘
//!        │ drain_into                                           │
//!        ▼                                                      ▼
//! ┌──────────────┐                                       ┌──────────────┐
//! │ Whiteboard   │                                       │ Whiteboard   │
//! └──────────────┘                                       └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded SyncMessage)
//! - [`channel`] — Transport trait, handler dispatch, echo/duplicate/gap rules
//! - [`broadcast`] — Room-based fan-out
//! - [`local`] — In-process relay
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket client transport

pub mod protocol;
pub mod channel;
pub mod broadcast;
pub mod local;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{MessageType, PeerInfo, ProtocolError, SyncMessage};
pub use channel::{
    bind_whiteboard, ChannelStats, EchoPolicy, Envelope, Handler, PeerLeftHook,
    ReplicationChannel, Role, Transport,
};
pub use broadcast::{Admission, BroadcastGroup, BroadcastStats, RoomManager};
pub use local::{local_relay, LocalConnector, LocalPeerTransport, LocalRelayTransport};
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use client::{ConnectionState, SyncClient, SyncEvent, WsTransport};

//! Replication channel: the only place where frames from the network touch
//! whiteboard state.
//!
//! A channel owns a [`Transport`] and plays one of two roles:
//!
//! - **Client**: `send` wraps local board messages into numbered frames;
//!   `drain_into` decodes inbound frames once per tick and dispatches them
//!   through a handler table keyed by [`MessageType`].
//! - **Relay**: `drain_into` validates inbound frames and rebroadcasts them to
//!   every peer, the original sender included. It never dispatches.
//!
//! Delivery is best effort. A client drops its own echoes, discards
//! duplicates and reports sequence gaps so stroke replay can restart cleanly.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use chalk_core::{BoardMessage, SurfaceRenderer, Whiteboard};

use crate::protocol::{MessageType, ProtocolError, SyncMessage};

/// Moves encoded frames between a channel and the rest of the session.
pub trait Transport: Send {
    /// Queue a frame for the relay. Client side.
    fn send(&mut self, frame: Arc<Vec<u8>>) -> Result<(), ProtocolError>;

    /// Next inbound frame, if one is ready. Never blocks.
    fn poll(&mut self) -> Option<Arc<Vec<u8>>>;

    /// Deliver a frame to every connected peer. Relay side.
    fn broadcast(&mut self, _frame: Arc<Vec<u8>>) -> Result<usize, ProtocolError> {
        Err(ProtocolError::WrongRole("broadcast"))
    }

    fn is_open(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Relay,
}

/// What a client does with frames it sent itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoPolicy {
    /// Skip them; the message was applied locally when it was produced.
    #[default]
    IgnoreOwn,
    /// Apply them like any other frame.
    Apply,
}

/// Delivery metadata passed to handlers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub sender: Uuid,
    pub seq: u64,
    /// Frames from `sender` were lost between the previous one and this one.
    pub gap: bool,
}

pub type Handler<T> = fn(&mut T, &Envelope, BoardMessage);
pub type PeerLeftHook<T> = fn(&mut T, Uuid);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub sent: u64,
    /// Outbound frames lost to a closed or saturated transport
    pub dropped: u64,
    pub received: u64,
    pub applied: u64,
    pub echoes: u64,
    pub duplicates: u64,
    pub gaps: u64,
    /// Undecodable, foreign-board or unhandled frames
    pub invalid: u64,
    pub relayed: u64,
    /// Operations refused for this role
    pub refused: u64,
}

pub struct ReplicationChannel<T> {
    peer_id: Uuid,
    board_id: Uuid,
    role: Role,
    echo: EchoPolicy,
    transport: Box<dyn Transport>,
    handlers: HashMap<MessageType, Handler<T>>,
    peer_left: Option<PeerLeftHook<T>>,
    next_seq: u64,
    last_seen: HashMap<Uuid, u64>,
    stats: ChannelStats,
}

impl<T> ReplicationChannel<T> {
    pub fn client(peer_id: Uuid, board_id: Uuid, transport: impl Transport + 'static) -> Self {
        Self::new(Role::Client, peer_id, board_id, Box::new(transport))
    }

    pub fn relay(peer_id: Uuid, board_id: Uuid, transport: impl Transport + 'static) -> Self {
        Self::new(Role::Relay, peer_id, board_id, Box::new(transport))
    }

    fn new(role: Role, peer_id: Uuid, board_id: Uuid, transport: Box<dyn Transport>) -> Self {
        Self {
            peer_id,
            board_id,
            role,
            echo: EchoPolicy::default(),
            transport,
            handlers: HashMap::new(),
            peer_left: None,
            next_seq: 1,
            last_seen: HashMap::new(),
            stats: ChannelStats::default(),
        }
    }

    pub fn with_echo_policy(mut self, echo: EchoPolicy) -> Self {
        self.echo = echo;
        self
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Route inbound frames of `msg_type` to `handler`. Control types are
    /// rejected.
    pub fn register_handler(&mut self, msg_type: MessageType, handler: Handler<T>) -> bool {
        if !msg_type.is_board() {
            log::warn!("Cannot register a handler for control type {:?}", msg_type);
            return false;
        }
        self.handlers.insert(msg_type, handler);
        true
    }

    pub fn on_peer_left(&mut self, hook: PeerLeftHook<T>) {
        self.peer_left = Some(hook);
    }

    /// Replicate a locally applied board message.
    ///
    /// A closed or saturated transport loses the frame silently; the
    /// sequence number is consumed anyway so receivers see the gap.
    pub fn send(&mut self, message: &BoardMessage) -> Result<(), ProtocolError> {
        if self.role == Role::Relay {
            return Err(self.refuse("send"));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let frame = SyncMessage::board(self.peer_id, self.board_id, seq, message)?.encode()?;
        self.push(frame);
        Ok(())
    }

    pub fn send_all(
        &mut self,
        messages: impl IntoIterator<Item = BoardMessage>,
    ) -> Result<usize, ProtocolError> {
        let mut count = 0;
        for message in messages {
            self.send(&message)?;
            count += 1;
        }
        Ok(count)
    }

    /// Tell the other peers this one is going away.
    ///
    /// The in-process relay forwards the frame as is. The WebSocket relay
    /// closes the connection instead and announces the departure itself.
    pub fn leave(&mut self) -> Result<(), ProtocolError> {
        if self.role == Role::Relay {
            return Err(self.refuse("leave"));
        }
        let frame = SyncMessage::peer_left(self.peer_id, self.board_id).encode()?;
        self.push(frame);
        Ok(())
    }

    /// Fan an already encoded frame out to every peer.
    pub fn relay_to_all(&mut self, frame: Arc<Vec<u8>>) -> Result<usize, ProtocolError> {
        if self.role == Role::Client {
            return Err(self.refuse("relay_to_all"));
        }
        let delivered = self.transport.broadcast(frame)?;
        self.stats.relayed += 1;
        Ok(delivered)
    }

    fn push(&mut self, frame: Vec<u8>) {
        if !self.transport.is_open() {
            self.stats.dropped += 1;
            log::debug!("Transport closed, dropping outbound frame");
            return;
        }
        match self.transport.send(Arc::new(frame)) {
            Ok(()) => self.stats.sent += 1,
            Err(e) => {
                self.stats.dropped += 1;
                log::debug!("Outbound frame dropped: {}", e);
            }
        }
    }

    fn refuse(&mut self, op: &'static str) -> ProtocolError {
        self.stats.refused += 1;
        log::warn!("{} refused for {:?} channel {}", op, self.role, self.peer_id);
        ProtocolError::WrongRole(op)
    }

    /// Process every frame currently waiting on the transport.
    ///
    /// Client: returns the number of board messages handed to handlers.
    /// Relay: returns the number of frames rebroadcast.
    pub fn drain_into(&mut self, target: &mut T) -> usize {
        let mut handled = 0;
        while let Some(frame) = self.transport.poll() {
            self.stats.received += 1;
            let handled_frame = match self.role {
                Role::Relay => self.relay_frame(frame),
                Role::Client => self.dispatch(target, &frame),
            };
            if handled_frame {
                handled += 1;
            }
        }
        handled
    }

    fn relay_frame(&mut self, frame: Arc<Vec<u8>>) -> bool {
        if let Err(e) = SyncMessage::decode(&frame) {
            self.stats.invalid += 1;
            log::warn!("Relay dropping undecodable frame: {}", e);
            return false;
        }
        match self.relay_to_all(frame) {
            Ok(receivers) => {
                log::trace!("Relayed frame to {} peer(s)", receivers);
                true
            }
            Err(e) => {
                log::warn!("Relay broadcast failed: {}", e);
                false
            }
        }
    }

    fn dispatch(&mut self, target: &mut T, frame: &[u8]) -> bool {
        let msg = match SyncMessage::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                self.stats.invalid += 1;
                log::warn!("Dropping undecodable frame: {}", e);
                return false;
            }
        };

        match msg.msg_type {
            MessageType::Ping | MessageType::Pong => {
                log::trace!("{:?} from {}", msg.msg_type, msg.peer_id);
                return false;
            }
            _ if msg.board_id != self.board_id => {
                self.stats.invalid += 1;
                log::warn!("Frame for foreign board {} from {}", msg.board_id, msg.peer_id);
                return false;
            }
            MessageType::PeerJoined => {
                match msg.peer_info() {
                    Ok(info) => log::info!("Peer joined: {} ({})", info.name, info.peer_id),
                    Err(_) => log::info!("Peer joined: {}", msg.peer_id),
                }
                return false;
            }
            MessageType::PeerLeft => {
                if msg.peer_id == self.peer_id {
                    return false;
                }
                self.last_seen.remove(&msg.peer_id);
                log::info!("Peer left: {}", msg.peer_id);
                if let Some(hook) = self.peer_left {
                    hook(target, msg.peer_id);
                }
                return false;
            }
            _ => {}
        }

        if msg.peer_id == self.peer_id && self.echo == EchoPolicy::IgnoreOwn {
            self.stats.echoes += 1;
            return false;
        }

        let last = self.last_seen.get(&msg.peer_id).copied();
        if let Some(last) = last {
            if msg.seq <= last {
                self.stats.duplicates += 1;
                log::debug!("Duplicate seq {} from {} (last {})", msg.seq, msg.peer_id, last);
                return false;
            }
        }

        let Some(handler) = self.handlers.get(&msg.msg_type).copied() else {
            self.stats.invalid += 1;
            log::debug!("No handler for {:?}", msg.msg_type);
            return false;
        };
        let message = match msg.board_message() {
            Ok(message) => message,
            Err(e) => {
                self.stats.invalid += 1;
                log::warn!("Bad {:?} payload from {}: {}", msg.msg_type, msg.peer_id, e);
                return false;
            }
        };

        let gap = last.is_some_and(|last| msg.seq > last + 1);
        if gap {
            self.stats.gaps += 1;
            log::debug!("Sequence gap from {} before seq {}", msg.peer_id, msg.seq);
        }
        self.last_seen.insert(msg.peer_id, msg.seq);

        let envelope = Envelope {
            sender: msg.peer_id,
            seq: msg.seq,
            gap,
        };
        handler(target, &envelope, message);
        self.stats.applied += 1;
        true
    }
}

fn apply_to_board<R: SurfaceRenderer>(board: &mut Whiteboard<R>, env: &Envelope, msg: BoardMessage) {
    if env.gap {
        board.sequence_gap(env.sender);
    }
    board.apply_remote(env.sender, msg);
}

fn drop_peer<R: SurfaceRenderer>(board: &mut Whiteboard<R>, peer: Uuid) {
    board.peer_left(peer);
}

/// Route every board message type into a [`Whiteboard`].
pub fn bind_whiteboard<R: SurfaceRenderer>(channel: &mut ReplicationChannel<Whiteboard<R>>) {
    for msg_type in [
        MessageType::Draw,
        MessageType::MarkerColor,
        MessageType::PenSize,
        MessageType::PageChange,
        MessageType::ImagePaste,
    ] {
        channel.register_handler(msg_type, apply_to_board::<R>);
    }
    channel.on_peer_left(drop_peer::<R>);
}

//! Multi-peer replication tests.
//!
//! The first half runs whole whiteboards over the in-process relay; the second
//! half starts a real WebSocket relay server and connects real clients.

use std::sync::Arc;
use std::time::Instant;

use chalk_collab::channel::{bind_whiteboard, ReplicationChannel, Transport};
use chalk_collab::client::{ConnectionState, SyncClient, SyncEvent};
use chalk_collab::local::{local_relay, LocalConnector, LocalPeerTransport};
use chalk_collab::protocol::{PeerInfo, ProtocolError, SyncMessage};
use chalk_collab::server::{RelayServer, ServerConfig};
use chalk_core::{
    BitmapRenderer, BoardMessage, InputSnapshot, MarkerId, PageDirection, Rgba, SurfaceId,
    Whiteboard, WhiteboardConfig,
};
use futures_util::SinkExt;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

const PEN: MarkerId = MarkerId(0);
const ERASER: MarkerId = MarkerId(1);

type Board = Whiteboard<BitmapRenderer>;

fn new_board(pages: u32) -> Board {
    let config = WhiteboardConfig {
        pages,
        surface_width: 100,
        surface_height: 100,
        ..WhiteboardConfig::default()
    };
    let renderer = BitmapRenderer::new(config.background);
    Whiteboard::init(config, renderer)
}

fn touch(marker: MarkerId, x: i32, y: i32) -> InputSnapshot {
    InputSnapshot::new().touch(marker, SurfaceId(0), x, y)
}

fn checksum(board: &Board, page: u32) -> u64 {
    board
        .renderer()
        .checksum(board.surface(SurfaceId(page)).unwrap())
}

fn pixel(board: &Board, x: i32, y: i32) -> Rgba {
    board
        .renderer()
        .pixel(board.surface(SurfaceId(0)).unwrap(), x, y)
        .unwrap()
}

struct Peer {
    board: Board,
    channel: ReplicationChannel<Board>,
}

impl Peer {
    fn join(board_id: Uuid, peer_id: Uuid, transport: impl Transport + 'static, pages: u32) -> Self {
        let mut channel = ReplicationChannel::client(peer_id, board_id, transport);
        bind_whiteboard(&mut channel);
        Self {
            board: new_board(pages),
            channel,
        }
    }

    fn flush(&mut self) {
        let outbound = self.board.take_outbound();
        self.channel.send_all(outbound).unwrap();
    }

    fn drain(&mut self) -> usize {
        self.channel.drain_into(&mut self.board)
    }
}

/// In-process session: one relay, any number of peers.
struct Session {
    board_id: Uuid,
    relay: ReplicationChannel<()>,
    connector: LocalConnector,
}

impl Session {
    fn new() -> Self {
        let board_id = Uuid::new_v4();
        let (relay_side, connector) = local_relay(256);
        Self {
            board_id,
            relay: ReplicationChannel::relay(Uuid::nil(), board_id, relay_side),
            connector,
        }
    }

    fn peer(&self, pages: u32) -> Peer {
        Peer::join(self.board_id, Uuid::new_v4(), self.connector.connect(), pages)
    }

    /// Flush every outbox, relay, deliver.
    fn round(&mut self, peers: &mut [&mut Peer]) {
        for peer in peers.iter_mut() {
            peer.flush();
        }
        self.relay.drain_into(&mut ());
        for peer in peers.iter_mut() {
            peer.drain();
        }
    }
}

#[test]
fn test_three_peers_converge() {
    let t = Instant::now();
    let mut session = Session::new();
    let mut alice = session.peer(1);
    let mut bob = session.peer(1);
    let mut carol = session.peer(1);

    bob.board.set_color(ERASER, Rgba::rgb(0, 0, 255)).unwrap();
    session.round(&mut [&mut alice, &mut bob, &mut carol]);

    // Alice draws along the top, Bob along the bottom, interleaved by tick
    let alice_path = [(10, 10), (30, 12), (60, 20), (90, 10)];
    let bob_path = [(10, 80), (40, 85), (70, 90), (90, 70)];
    for (a, b) in alice_path.iter().zip(bob_path.iter()) {
        alice.board.tick(&touch(PEN, a.0, a.1), t);
        bob.board.tick(&touch(ERASER, b.0, b.1), t);
        session.round(&mut [&mut alice, &mut bob, &mut carol]);
    }
    alice.board.tick(&InputSnapshot::new(), t);
    bob.board.tick(&InputSnapshot::new(), t);
    carol.board.tick(&InputSnapshot::new(), t);
    session.round(&mut [&mut alice, &mut bob, &mut carol]);

    let expected = checksum(&alice.board, 0);
    assert_eq!(checksum(&bob.board, 0), expected);
    assert_eq!(checksum(&carol.board, 0), expected);
    assert_eq!(pixel(&carol.board, 30, 12), Rgba::WHITE);
    assert_eq!(pixel(&carol.board, 40, 85), Rgba::rgb(0, 0, 255));
    assert_eq!(carol.board.color(ERASER), Some(Rgba::rgb(0, 0, 255)));

    // Own frames came back from the relay and were skipped
    assert!(alice.channel.stats().echoes >= 4);
    assert_eq!(alice.channel.stats().gaps, 0);
}

#[test]
fn test_page_and_pen_size_replicate() {
    let t = Instant::now();
    let mut session = Session::new();
    let mut alice = session.peer(3);
    let mut bob = session.peer(3);

    assert!(alice.board.switch_page(PageDirection::Right));
    alice.board.set_pen_size(PEN, 12, t).unwrap();
    // Trailing-edge throttle: goes out on a later tick
    alice
        .board
        .tick(&InputSnapshot::new(), t + Duration::from_millis(150));
    session.round(&mut [&mut alice, &mut bob]);

    assert_eq!(bob.board.current_page(), 1);
    assert_eq!(bob.board.page_label(), "Page 2/3");
    assert_eq!(bob.board.pen_size(PEN), Some(12));
}

#[test]
fn test_rejoin_after_leave_is_accepted() {
    let t = Instant::now();
    let mut session = Session::new();
    let alice_id = Uuid::new_v4();
    let mut alice = Peer::join(session.board_id, alice_id, session.connector.connect(), 1);
    let mut bob = session.peer(1);

    // Stroke cut off mid-way by a disconnect
    alice.board.tick(&touch(PEN, 10, 10), t);
    alice.board.tick(&touch(PEN, 50, 10), t);
    session.round(&mut [&mut alice, &mut bob]);
    alice.channel.leave().unwrap();
    session.round(&mut [&mut alice, &mut bob]);

    // Same peer comes back with a fresh channel, sequence restarts at 1
    let mut alice = Peer::join(session.board_id, alice_id, session.connector.connect(), 1);
    alice.board.tick(&touch(PEN, 50, 90), t);
    alice.board.tick(&InputSnapshot::new(), t);
    session.round(&mut [&mut alice, &mut bob]);

    assert_eq!(bob.channel.stats().duplicates, 0);
    assert_eq!(pixel(&bob.board, 50, 90), Rgba::WHITE);
    // No line joining the old stroke to the new one
    assert_eq!(pixel(&bob.board, 50, 50), Rgba::BLACK);
}

/// Loses one chosen outbound frame.
struct LossyTransport {
    inner: LocalPeerTransport,
    sent: usize,
    lose: usize,
}

impl Transport for LossyTransport {
    fn send(&mut self, frame: Arc<Vec<u8>>) -> Result<(), ProtocolError> {
        self.sent += 1;
        if self.sent == self.lose {
            return Ok(());
        }
        self.inner.send(frame)
    }

    fn poll(&mut self) -> Option<Arc<Vec<u8>>> {
        self.inner.poll()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

#[test]
fn test_lost_frame_restarts_remote_stroke() {
    let t = Instant::now();
    let mut session = Session::new();
    let lossy = LossyTransport {
        inner: session.connector.connect(),
        sent: 0,
        lose: 3,
    };
    let mut alice = Peer::join(session.board_id, Uuid::new_v4(), lossy, 1);
    let mut bob = session.peer(1);

    for x in [10, 40, 70, 90] {
        alice.board.tick(&touch(PEN, x, 10), t);
        session.round(&mut [&mut alice, &mut bob]);
    }

    assert_eq!(bob.channel.stats().gaps, 1);
    assert_eq!(pixel(&bob.board, 25, 10), Rgba::WHITE);
    assert_eq!(pixel(&bob.board, 90, 10), Rgba::WHITE);
    // The segment around the lost point is missing, not bridged
    assert_eq!(pixel(&alice.board, 60, 10), Rgba::WHITE);
    assert_eq!(pixel(&bob.board, 60, 10), Rgba::BLACK);
}

#[test]
fn test_clear_stays_local() {
    let t = Instant::now();
    let mut session = Session::new();
    let mut alice = session.peer(1);
    let mut bob = session.peer(1);

    alice.board.tick(&touch(PEN, 20, 20), t);
    alice.board.tick(&InputSnapshot::new(), t);
    session.round(&mut [&mut alice, &mut bob]);

    assert!(bob.board.clear_page() > 0);
    session.round(&mut [&mut alice, &mut bob]);

    assert_eq!(pixel(&bob.board, 20, 20), Rgba::BLACK);
    assert_eq!(pixel(&alice.board, 20, 20), Rgba::WHITE);
}

// ─────────────────────────────────────────────────────────────────────
// WebSocket relay
// ─────────────────────────────────────────────────────────────────────

/// Start a server on a free port, return the server and its URL.
async fn start_test_server(max_peers_per_room: usize) -> (Arc<RelayServer>, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        max_peers_per_room,
        broadcast_capacity: 64,
        heartbeat_interval_secs: 30,
    };
    let server = Arc::new(RelayServer::new(config));
    let running = server.clone();
    tokio::spawn(async move {
        let _ = running.serve(listener).await;
    });
    (server, format!("ws://127.0.0.1:{port}"))
}

/// Keep pumping until `done` holds or two seconds pass.
async fn pump_until(peers: &mut [&mut Peer], done: impl Fn(&[&mut Peer]) -> bool) -> bool {
    for _ in 0..200 {
        for peer in peers.iter_mut() {
            peer.flush();
            peer.drain();
        }
        if done(peers) {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let (_server, url) = start_test_server(10).await;
    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_websocket_stroke_converges() {
    let (server, url) = start_test_server(10).await;
    let board_id = Uuid::new_v4();
    let t = Instant::now();

    let mut alice_client = SyncClient::new(PeerInfo::new("Alice"), board_id, &url);
    let mut events = alice_client.take_event_rx().unwrap();
    let alice_transport = alice_client.connect().await.unwrap();
    assert_eq!(events.recv().await, Some(SyncEvent::Connected));
    assert_eq!(alice_client.connection_state().await, ConnectionState::Connected);

    let mut bob_client = SyncClient::new(PeerInfo::new("Bob"), board_id, &url);
    let bob_transport = bob_client.connect().await.unwrap();

    let mut alice = Peer::join(board_id, alice_client.peer_info().peer_id, alice_transport, 1);
    let mut bob = Peer::join(board_id, bob_client.peer_info().peer_id, bob_transport, 1);

    // Let both joins land before drawing
    assert!(pump_until(&mut [&mut alice, &mut bob], |_| true).await);
    sleep(Duration::from_millis(50)).await;

    for (x, y) in [(10, 10), (10, 10), (50, 10), (52, 60), (90, 90)] {
        alice.board.tick(&touch(PEN, x, y), t);
    }
    alice.board.tick(&InputSnapshot::new(), t);

    let expected = checksum(&alice.board, 0);
    let converged = pump_until(&mut [&mut alice, &mut bob], |peers| {
        checksum(&peers[1].board, 0) == expected
    })
    .await;
    assert!(converged, "Bob never matched Alice's page");

    assert_eq!(pixel(&bob.board, 52, 60), Rgba::WHITE);
    assert_eq!(server.stats().await.active_rooms, 1);
    assert!(server.stats().await.relayed_frames >= 5);
}

#[tokio::test]
async fn test_websocket_color_and_page() {
    let (_server, url) = start_test_server(10).await;
    let board_id = Uuid::new_v4();

    let mut alice_client = SyncClient::new(PeerInfo::new("Alice"), board_id, &url);
    let mut bob_client = SyncClient::new(PeerInfo::new("Bob"), board_id, &url);
    let mut alice = Peer::join(
        board_id,
        alice_client.peer_info().peer_id,
        alice_client.connect().await.unwrap(),
        2,
    );
    let mut bob = Peer::join(
        board_id,
        bob_client.peer_info().peer_id,
        bob_client.connect().await.unwrap(),
        2,
    );
    sleep(Duration::from_millis(50)).await;

    bob.board.set_color(PEN, Rgba::rgb(200, 10, 10)).unwrap();
    assert!(bob.board.switch_page(PageDirection::Right));

    let synced = pump_until(&mut [&mut alice, &mut bob], |peers| {
        peers[0].board.current_page() == 1
            && peers[0].board.color(PEN) == Some(Rgba::rgb(200, 10, 10))
    })
    .await;
    assert!(synced);
}

#[tokio::test]
async fn test_disconnect_announces_peer_left() {
    let (server, url) = start_test_server(10).await;
    let board_id = Uuid::new_v4();

    let mut alice_client = SyncClient::new(PeerInfo::new("Alice"), board_id, &url);
    let alice_id = alice_client.peer_info().peer_id;
    let alice_transport = alice_client.connect().await.unwrap();

    let mut bob_client = SyncClient::new(PeerInfo::new("Bob"), board_id, &url);
    let mut bob: ReplicationChannel<Vec<Uuid>> = ReplicationChannel::client(
        bob_client.peer_info().peer_id,
        board_id,
        bob_client.connect().await.unwrap(),
    );
    bob.on_peer_left(|left, peer| left.push(peer));
    sleep(Duration::from_millis(50)).await;

    alice_client.disconnect().await;
    drop(alice_transport);

    let mut left = Vec::new();
    let result = timeout(Duration::from_secs(2), async {
        while left.is_empty() {
            bob.drain_into(&mut left);
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "Bob should hear that Alice left");
    assert_eq!(left, vec![alice_id]);
    assert_eq!(server.room_manager().room_count().await, 1);
}

#[tokio::test]
async fn test_leave_is_announced_once_and_closes() {
    let (server, url) = start_test_server(10).await;
    let board_id = Uuid::new_v4();

    let mut alice_client = SyncClient::new(PeerInfo::new("Alice"), board_id, &url);
    let alice_id = alice_client.peer_info().peer_id;
    let mut alice: ReplicationChannel<()> =
        ReplicationChannel::client(alice_id, board_id, alice_client.connect().await.unwrap());

    let mut bob_client = SyncClient::new(PeerInfo::new("Bob"), board_id, &url);
    let mut bob: ReplicationChannel<Vec<Uuid>> = ReplicationChannel::client(
        bob_client.peer_info().peer_id,
        board_id,
        bob_client.connect().await.unwrap(),
    );
    bob.on_peer_left(|left, peer| left.push(peer));
    sleep(Duration::from_millis(50)).await;

    alice.leave().unwrap();

    let closed = timeout(Duration::from_secs(2), async {
        while alice.is_open() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(closed.is_ok(), "Relay should close the connection after leave");

    let mut left = Vec::new();
    let heard = timeout(Duration::from_secs(2), async {
        while left.is_empty() {
            bob.drain_into(&mut left);
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(heard.is_ok(), "Bob should hear that Alice left");
    sleep(Duration::from_millis(50)).await;
    bob.drain_into(&mut left);

    assert_eq!(left, vec![alice_id]);
    let stats = server.stats().await;
    assert_eq!(stats.rejected_frames, 0);
    assert_eq!(server.room_manager().room_count().await, 1);
}

#[tokio::test]
async fn test_frames_before_join_rejected() {
    let (server, url) = start_test_server(10).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let draw = BoardMessage::Page(chalk_core::PageChange {
        direction: PageDirection::Left,
    });
    let frame = SyncMessage::board(Uuid::new_v4(), Uuid::new_v4(), 1, &draw)
        .unwrap()
        .encode()
        .unwrap();
    ws.send(Message::Binary(frame.into())).await.unwrap();

    let rejected = timeout(Duration::from_secs(2), async {
        while server.stats().await.rejected_frames == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(rejected.is_ok());
    assert_eq!(server.room_manager().room_count().await, 0);
}

#[tokio::test]
async fn test_full_room_refuses_peer() {
    let (server, url) = start_test_server(1).await;
    let board_id = Uuid::new_v4();

    let mut first = SyncClient::new(PeerInfo::new("Alice"), board_id, &url);
    let _first_transport = first.connect().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let mut second = SyncClient::new(PeerInfo::new("Bob"), board_id, &url);
    let second_transport = second.connect().await.unwrap();

    let closed = timeout(Duration::from_secs(2), async {
        while second_transport.is_open() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(closed.is_ok(), "Second peer should be turned away");
    assert_eq!(server.stats().await.refused_peers, 1);
}

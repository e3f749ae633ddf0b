//! chalk: headless whiteboard peer and relay.
//!
//! `chalk relay` runs the WebSocket relay. `chalk peer` joins a board on a
//! relay and plays a drawing script through the frame loop. `chalk local`
//! plays several scripts as peers of one in-process board and reports whether
//! their pages converged.

mod cli;
mod loader;
mod script;

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::Parser;
use log::info;
use uuid::Uuid;

use chalk_collab::{
    bind_whiteboard, local_relay, PeerInfo, RelayServer, ReplicationChannel, ServerConfig,
    SyncClient,
};
use chalk_core::{BitmapRenderer, Whiteboard, WhiteboardConfig};

use cli::{Cli, Commands, SessionArgs};
use loader::{save_notes, FileImageLoader};
use script::{Script, ScriptPlayer};

type Board = Whiteboard<BitmapRenderer>;

/// Pasted images resolve relative to `images`.
fn open_board(session: &SessionArgs, images: &Path) -> Result<Board, Box<dyn Error>> {
    let config = WhiteboardConfig::load_or_create(&session.config)?;
    let renderer = BitmapRenderer::new(config.background);
    Ok(Whiteboard::init(config, renderer).with_loader(FileImageLoader::with_base(images)))
}

fn script_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

fn load_script(path: &Path) -> Result<Script, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    let script = Script::parse(&text).map_err(|e| format!("{}: {e}", path.display()))?;
    info!("Loaded {} ({} ticks)", path.display(), script.ticks());
    Ok(script)
}

/// One frame: apply relayed messages, then local input, then replicate.
fn frame(
    board: &mut Board,
    channel: &mut ReplicationChannel<Board>,
    player: Option<&mut ScriptPlayer<'_>>,
    now: Instant,
) {
    channel.drain_into(board);
    let input = player
        .and_then(|p| p.step(board, now))
        .unwrap_or_default();
    board.tick(&input, now);
    if let Err(e) = channel.send_all(board.take_outbound()) {
        log::warn!("Replication failed: {e}");
    }
}

/// End strokes, tell the others, and keep the notes if configured.
fn finish(
    board: &mut Board,
    channel: &mut ReplicationChannel<Board>,
    notes_dir: &Path,
) -> Result<(), Box<dyn Error>> {
    board.shutdown();
    channel.send_all(board.take_outbound())?;
    channel.leave()?;

    let stats = channel.stats();
    info!(
        "Session over: sent {}, dropped {}, applied {}, gaps {}, invalid {}",
        stats.sent, stats.dropped, stats.applied, stats.gaps, stats.invalid
    );
    if board.config().save_notes {
        save_notes(board, notes_dir)?;
    }
    Ok(())
}

async fn run_relay(config: ServerConfig) -> Result<(), Box<dyn Error>> {
    let server = RelayServer::new(config);
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down relay"),
    }
    let stats = server.stats().await;
    info!(
        "Relay stats: {} connection(s), {} frame(s) relayed, {} rejected",
        stats.total_connections, stats.relayed_frames, stats.rejected_frames
    );
    Ok(())
}

async fn run_peer(
    server: String,
    board_id: Uuid,
    name: String,
    script: Option<&Path>,
    session: SessionArgs,
) -> Result<(), Box<dyn Error>> {
    let images = script.map_or(Path::new("."), script_dir);
    let script = match script {
        Some(path) => Some(load_script(path)?),
        None => None,
    };
    let mut board = open_board(&session, images)?;

    let info = PeerInfo::new(name);
    let mut client = SyncClient::new(info.clone(), board_id, server);
    let transport = client.connect().await?;
    let mut channel = ReplicationChannel::client(info.peer_id, board_id, transport);
    bind_whiteboard(&mut channel);

    let mut player = script.as_ref().map(Script::player);
    let mut ticker = tokio::time::interval(Duration::from_millis(session.tick_ms.max(1)));
    let mut settle = session.settle_ticks;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
        frame(&mut board, &mut channel, player.as_mut(), Instant::now());

        if !channel.is_open() {
            log::warn!("Lost connection to relay");
            break;
        }
        // Without a script, watch until interrupted
        if let Some(p) = &player {
            if p.is_finished() {
                if settle == 0 {
                    break;
                }
                settle -= 1;
            }
        }
    }

    finish(&mut board, &mut channel, &session.notes_dir)?;
    // Let the writer task flush the last frames
    tokio::time::sleep(Duration::from_millis(session.tick_ms.max(1) * 2)).await;
    client.disconnect().await;
    Ok(())
}

fn run_local(paths: &[PathBuf], session: SessionArgs) -> Result<(), Box<dyn Error>> {
    let scripts = paths
        .iter()
        .map(|p| load_script(p))
        .collect::<Result<Vec<_>, _>>()?;

    let board_id = Uuid::new_v4();
    let (relay_side, connector) = local_relay(1024);
    let mut relay: ReplicationChannel<()> =
        ReplicationChannel::relay(Uuid::nil(), board_id, relay_side);

    let mut peers = Vec::with_capacity(scripts.len());
    for path in paths {
        let board = open_board(&session, script_dir(path))?;
        let mut channel = ReplicationChannel::client(Uuid::new_v4(), board_id, connector.connect());
        bind_whiteboard(&mut channel);
        peers.push((board, channel));
    }
    let mut players: Vec<ScriptPlayer<'_>> = scripts.iter().map(Script::player).collect();

    // Simulated clock: ticks are replayed as fast as possible
    let start = Instant::now();
    let tick = Duration::from_millis(session.tick_ms.max(1));
    let mut now = start;
    let mut settle = session.settle_ticks;
    loop {
        now += tick;
        for ((board, channel), player) in peers.iter_mut().zip(players.iter_mut()) {
            frame(board, channel, Some(player), now);
        }
        relay.drain_into(&mut ());

        if players.iter().all(ScriptPlayer::is_finished) {
            if settle == 0 {
                break;
            }
            settle -= 1;
        }
    }

    for (i, (board, channel)) in peers.iter_mut().enumerate() {
        channel.drain_into(board);
        let notes = session.notes_dir.join(format!("peer_{}", i + 1));
        finish(board, channel, &notes)?;
    }
    relay.drain_into(&mut ());

    let digests: Vec<Vec<u64>> = peers
        .iter()
        .map(|(board, _)| {
            board
                .surfaces()
                .iter()
                .map(|s| board.renderer().checksum(s))
                .collect()
        })
        .collect();
    for (i, digest) in digests.iter().enumerate() {
        info!("Peer {}: page checksums {:016x?}", i + 1, digest);
    }
    if digests.windows(2).all(|w| w[0] == w[1]) {
        info!("All {} peer(s) converged", digests.len());
    } else {
        log::warn!("Peers diverged");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Relay {
            bind,
            max_peers,
            capacity,
            heartbeat_secs,
        } => {
            info!("Starting relay on {bind}");
            run_relay(ServerConfig {
                bind_addr: bind,
                max_peers_per_room: max_peers,
                broadcast_capacity: capacity,
                heartbeat_interval_secs: heartbeat_secs,
            })
            .await
        }
        Commands::Peer {
            server,
            board,
            name,
            script,
            session,
        } => run_peer(server, board, name, script.as_deref(), session).await,
        Commands::Local { scripts, session } => run_local(&scripts, session),
    }
}

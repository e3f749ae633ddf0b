use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "chalk",
    about = "Shared whiteboard: relay server and scripted peers",
    author,
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the WebSocket relay that fans frames out to every peer of a board.
    Relay {
        /// Address to listen on.
        #[arg(long, env = "CHALK_BIND", default_value = "127.0.0.1:9090")]
        bind: String,
        /// Peers allowed in one board room.
        #[arg(long, default_value_t = 100)]
        max_peers: usize,
        /// Frames buffered per peer before a slow peer starts losing frames.
        #[arg(long, default_value_t = 256)]
        capacity: usize,
        /// Keep-alive ping interval in seconds (0 disables).
        #[arg(long, default_value_t = 30)]
        heartbeat_secs: u64,
    },
    /// Join a board on a relay server and play a drawing script.
    Peer {
        /// Relay server URL.
        #[arg(long, env = "CHALK_SERVER", default_value = "ws://127.0.0.1:9090")]
        server: String,
        /// Board to join.
        #[arg(long, env = "CHALK_BOARD")]
        board: Uuid,
        /// Display name announced to the other peers.
        #[arg(long, default_value = "peer")]
        name: String,
        /// Drawing script to play (one action per tick).
        #[arg(long)]
        script: Option<PathBuf>,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Play several scripts as peers of one in-process board.
    Local {
        /// One script per peer.
        #[arg(required = true)]
        scripts: Vec<PathBuf>,
        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(Debug, clap::Args)]
pub struct SessionArgs {
    /// Whiteboard configuration; created with defaults when missing.
    #[arg(long, default_value = "WhiteboardConfig.json")]
    pub config: PathBuf,
    /// Milliseconds per tick.
    #[arg(long, default_value_t = 16)]
    pub tick_ms: u64,
    /// Ticks to keep receiving after the script ends.
    #[arg(long, default_value_t = 30)]
    pub settle_ticks: u32,
    /// Where page snapshots go when `save_notes` is enabled.
    #[arg(long, default_value = "notes")]
    pub notes_dir: PathBuf,
}

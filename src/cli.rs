use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Write logs to this file instead of stderr (keeps the overlay clean)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the live input overlay
    Run(SourceArgs),
    /// Print samples as JSON lines without a UI
    Probe {
        #[command(flatten)]
        source: SourceArgs,
        /// Stop after this many samples
        #[arg(long)]
        count: Option<usize>,
    },
    /// Print the effective settings
    Settings {
        /// Settings file to read
        #[arg(long)]
        settings: PathBuf,
        /// Overwrite the file with defaults first
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Args, Clone, Debug)]
pub struct SourceArgs {
    /// Where telemetry comes from
    #[arg(long, value_enum, default_value_t = SourceKind::Mock)]
    pub source: SourceKind,

    /// UDP address to receive telemetry datagrams on (udp source)
    #[arg(long, default_value = "127.0.0.1:9996")]
    pub bind: SocketAddr,

    /// Settings file; created or updated when settings change
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Built-in synthetic lap
    Mock,
    /// JSON datagrams from a sim-side bridge
    Udp,
}

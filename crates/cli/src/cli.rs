use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(about = "Browser-session orchestrator - drive many automated browsing contexts over NDJSON")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug); logs go to stderr
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Load orchestrator configuration from a JSON file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the command protocol on stdin/stdout
    Serve {
        /// Also accept out-of-band connections on this unix socket
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,

        /// Render engine to drive
        #[arg(long, value_enum, default_value = "stub")]
        engine: EngineKind,

        /// Override the configured maximum number of live sessions
        #[arg(long, value_name = "N")]
        max_sessions: Option<usize>,
    },

    /// Print the effective configuration and exit
    CheckConfig,
}

/// Engines this build can drive.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// In-process scripted engine; renders nothing, useful for smoke
    /// runs and protocol development.
    Stub,
}

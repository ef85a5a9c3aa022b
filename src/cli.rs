// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tunwarden")]
#[command(about = "Supervised SSH port-forwarding tunnels with automatic reconnect")]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "TUNWARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print final results and errors
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one or more configured port forwards until interrupted
    Run {
        /// Forward aliases (or ids) to start
        #[arg(required = true)]
        aliases: Vec<String>,
    },

    /// Check that a server is reachable and accepts our credentials
    Test {
        /// Server id, alias, or an ad-hoc user@host[:port]
        server: String,
    },

    /// Open an interactive shell on a server
    Connect {
        /// Server id, alias, or an ad-hoc user@host[:port]
        server: String,

        /// Authenticate with this credential (id or alias) instead of the server's own auth
        #[arg(short = 'o', long)]
        credential: Option<String>,
    },

    /// List configured port forwards
    Forwards,
}

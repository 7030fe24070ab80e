//! CLI command definitions for the `courier` binary.

pub mod serve;
pub mod stream;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Reliable message delivery and streamed assistant responses.
#[derive(Parser)]
#[command(name = "courier", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of plain text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Also export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on. Defaults to `server.port` from config.toml.
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to. Defaults to `server.host` from config.toml.
        #[arg(long)]
        host: Option<String>,
    },

    /// Stream a single response to stdout.
    Stream {
        /// Prompt sent as the user message.
        prompt: String,

        /// Session the stream belongs to.
        #[arg(long, default_value = "cli")]
        session: String,

        /// Agent identity for the stream.
        #[arg(long)]
        agent: Option<String>,

        /// Model override for the configured provider.
        #[arg(long)]
        model: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

//! CLI command definitions for the `wove` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod chat;
pub mod session;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Fashion assistant chat with durable, streaming sessions.
#[derive(Parser)]
#[command(name = "wove", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Owner whose sessions are used (overrides `[chat].owner_id`).
    #[arg(long, global = true, env = "WOVE_OWNER")]
    pub owner: Option<String>,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat.
    Chat {
        /// Open a specific session instead of the most recent one.
        #[arg(long, conflicts_with = "new")]
        session: Option<String>,

        /// Start with a fresh chat.
        #[arg(long)]
        new: bool,
    },

    /// Manage saved sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionCommand,
    },

    /// Start the HTTP server (generation proxy + session API).
    Serve {
        /// Port to listen on (defaults to `[server].port`).
        #[arg(short, long, env = "WOVE_PORT")]
        port: Option<u16>,

        /// Host to bind to (defaults to `[server].host`).
        #[arg(long, env = "WOVE_HOST")]
        host: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum SessionCommand {
    /// List sessions, most recently updated first.
    #[command(alias = "ls")]
    List,

    /// Print a session's conversation.
    Show {
        /// Session ID.
        id: String,
    },

    /// Set a session's title.
    Rename {
        /// Session ID.
        id: String,

        /// New title.
        title: String,
    },

    /// Delete a session and its messages.
    #[command(alias = "rm")]
    Delete {
        /// Session ID.
        id: String,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },
}

//! CLI command definitions and dispatch for the `parley` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod ask;
pub mod conversation;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Token-budgeted streaming chat conversations.
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "PARLEY_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on (defaults to `[server].port`).
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (defaults to `[server].host`).
        #[arg(long)]
        host: Option<String>,
    },

    /// Send one message and stream the reply to stdout.
    Ask {
        /// Conversation to continue; a new one is created when omitted or unknown.
        #[arg(long)]
        chat_id: Option<Uuid>,

        /// User identifier owning the conversation.
        #[arg(long)]
        user: String,

        /// The message to send.
        message: String,
    },

    /// Show a conversation with its active and erased messages.
    Show {
        chat_id: Uuid,
    },

    /// End a conversation so it accepts no further messages.
    End {
        chat_id: Uuid,
    },
}

//! Command-line interface (clap v4)

use clap::{Parser, Subcommand};

/// chatlink - resilient realtime chat client
///
/// Connects to a chat channel over WebSocket, keeps the connection alive,
/// and falls back to HTTP when the realtime channel cannot be sustained.
#[derive(Parser, Debug)]
#[command(name = "chatlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a channel; stdin lines are sent, inbound messages printed
    Run {
        /// Channel (conversation) to connect to
        #[arg(long, env = "CHATLINK_CHANNEL")]
        channel: String,

        /// Select and persist this scope before connecting
        #[arg(long)]
        scope: Option<String>,

        /// Origin override, e.g. https://chat.example.com
        #[arg(long)]
        origin: Option<String>,

        /// Path to configuration file
        #[arg(short, long, env = "CHATLINK_CONFIG")]
        config: Option<String>,
    },

    /// Manage the persisted scope selection
    Scope {
        #[command(subcommand)]
        subcommand: ScopeSubcommand,

        /// Path to configuration file
        #[arg(short, long, env = "CHATLINK_CONFIG", global = true)]
        config: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Display version and build information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ScopeSubcommand {
    /// Persist a scope selection
    Select {
        /// Scope identifier
        scope: String,
    },

    /// Print the persisted scope selection
    Show,

    /// Forget the persisted scope selection
    Clear,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show {
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Write a commented default configuration file
    Init {
        /// Where to create the file (default: ~/.chatlink/config.toml)
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check a configuration file
    Validate {
        #[arg(short, long)]
        config: Option<String>,
    },
}

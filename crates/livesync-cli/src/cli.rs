//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Backend WebSocket URL (overrides the configuration file)
    #[arg(long)]
    pub url: Option<String>,

    /// Display name attached to sent messages
    #[arg(short, long)]
    pub username: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Print the message list every time it changes
    Watch,
    /// Send a single message and exit once the backend acknowledges it
    Send {
        /// Message body
        body: String,
    },
    /// Watch the message list and send every line typed on stdin
    Chat,
}

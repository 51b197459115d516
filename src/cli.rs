use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "chatcore", about = "Chat client core: session, realtime sync and notification gating")]
pub struct Cli {
    /// Path to config file (default: ./config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Restore the session and keep the chat list in sync until Ctrl-C
    Run,
    /// Sign in with username and password
    Login,
    /// Clear the saved session
    Logout,
    /// Show whether a push payload would be surfaced
    Notify {
        /// Raw push payload as JSON
        #[arg(long)]
        payload: String,
        /// Chat currently open on screen
        #[arg(long)]
        focus_chat: Option<String>,
    },
    /// Save and register the device push token
    PushToken { token: String },
}

impl Cli {
    pub fn command_or_default(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

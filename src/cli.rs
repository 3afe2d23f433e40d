//! Command-line interface definition for the `sheikh` binary
//!
//! This module defines the CLI structure using clap's derive API. Every
//! command is a thin wrapper over [`crate::context::ChatContext`].

use clap::{Parser, Subcommand};

/// Sheikh - talk to a Sheikh conversation backend from the terminal
#[derive(Parser, Debug, Clone)]
#[command(name = "sheikh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/sheikh.yaml")]
    pub config: Option<String>,

    /// Override the backend base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List sessions known to the backend
    Sessions,

    /// Create a new session
    New {
        /// Title for the session
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Print a session's message history
    History {
        /// Session ID
        id: String,
    },

    /// Send a message to a session and print the reply
    Send {
        /// Session ID
        id: String,

        /// Message text
        message: String,

        /// Wait for the full reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Stop a session
    Stop {
        /// Session ID
        id: String,
    },

    /// Rename a session
    Rename {
        /// Session ID
        id: String,

        /// New title
        title: String,
    },

    /// Delete a session
    Delete {
        /// Session ID
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/sheikh.yaml".to_string()),
            base_url: None,
            verbose: false,
            command: Commands::Sessions,
        }
    }
}

//! Command-line interface, parsed with clap.

mod commands;

use clap::{Parser, Subcommand};

/// netgpt - conversational agent backend
#[derive(Parser)]
#[command(name = "netgpt")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server (default)
    Serve,

    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage declarative agent and workflow definitions
    #[command(alias = "defs")]
    Definitions {
        #[command(subcommand)]
        command: DefinitionCommands,
    },

    /// Write a default config.toml to the working directory
    Init,
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user account
    Add {
        username: String,
        password: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Comma-separated roles, e.g. "admin"
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
    },
    /// List user accounts
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
pub enum DefinitionCommands {
    /// Import sample definitions from the configured sample directories
    Seed {
        /// Directory the sample directories are resolved against
        #[arg(long, default_value = ".")]
        root: String,
    },
    /// List the latest version of every definition
    #[command(alias = "ls")]
    List,
}

pub use commands::*;

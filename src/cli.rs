//! Command-line interface for cableguy
//!
//! Uses clap with derive for type-safe CLI parsing

use cableguy::profile::DefaultProfile;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// cableguy - Ethernet interface addressing daemon
#[derive(Parser)]
#[command(name = "cableguy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Daemon configuration file path
    #[arg(short, long, default_value = "/etc/cableguy/cableguy.toml")]
    pub config: PathBuf,

    /// Settings file holding the desired interface state (overrides the config file)
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Profile used when no usable settings file exists
    #[arg(long, value_enum, default_value_t = DefaultProfile::Bluerov2)]
    pub default_config: DefaultProfile,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the interface manager (default)
    Run,

    /// Print the desired state that would be loaded
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Validate the settings file without falling back to a profile
    Check,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "cableguy", &mut std::io::stdout());
    }
}

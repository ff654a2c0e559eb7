use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "meshledger")]
#[command(author, version, about = "Resumable stage runner for video-to-mesh reconstruction projects")]
pub struct Cli {
    /// Project directory
    #[arg(short, long, global = true, default_value = ".")]
    pub project: PathBuf,

    /// Path to config file (defaults to <project>/project.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the project directories, default config and ledger header
    Init,

    /// Run one stage over every item that still needs it
    Run {
        /// Stage number (0-4)
        stage: u8,

        /// Process at most this many items
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show per-item stage completion
    Status {
        /// Only show items that still need this stage
        #[arg(long)]
        stage: Option<u8>,
    },

    /// Regenerate the batch manifest of a stage from the ledger
    Manifest {
        /// Stage number (1-4)
        stage: u8,
    },

    /// Roll back recorded progress
    #[command(subcommand)]
    Reset(ResetCommands),

    /// Validate the project configuration
    Validate,

    /// Check that the configured engine executable is available
    CheckEngine,

    /// Display version information
    Version,
}

#[derive(Subcommand)]
pub enum ResetCommands {
    /// Mark chosen stages of chosen items for reprocessing
    Selective {
        /// Work item identifiers
        #[arg(long, value_delimiter = ',', required = true)]
        items: Vec<String>,

        /// Stage numbers to reset
        #[arg(long, value_delimiter = ',', required = true)]
        stages: Vec<u8>,

        /// Show the planned changes without writing
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Delete outputs and ledger fields back to a stage boundary
    Staged {
        /// `after-N` (N = 0..3) or `before-all`
        target: String,

        /// Show what would be deleted without touching anything
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

//! CLI parse: clap types for genflow. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Genflow CLI - run generation requests through the priority scheduler
#[derive(Parser)]
#[command(name = "genflow")]
#[command(about = "Lifecycle state machine and priority scheduler for content generation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the user config file)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a JSON file of requests against the built-in echo provider
    Run {
        /// Path to a JSON array of requests
        requests: PathBuf,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
        /// Override queue.max_concurrent for this run
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Give up waiting after this many seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
        /// Append final unit snapshots to this JSONL file
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        /// Output format (toml or json)
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

#[derive(Debug, Clone, PartialEq, Parser)]
#[command(version, about = "Ingests HPC I/O histogram logs and slurm snapshots into the usage database")]
pub struct Args {
    /// Additional TOML config file, overrides `config/default.toml`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub log_level: Option<Level>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Create missing tables and columns
    Init,
    /// Ingest every `*.log` in the incoming directory
    ProcessLogs,
    /// Ingest a single log file
    ProcessFile {
        #[arg(long)]
        file: PathBuf,
        /// Move the file into the archive directory afterwards
        #[arg(long)]
        archive: bool,
    },
    /// Replace the job table with the latest slurm snapshot
    IngestSlurm {
        /// Defaults to `slurm_log_file` from the config
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the normalised GPU usage per user and machine as JSON
    GpuUsage {
        #[arg(long)]
        user: Option<String>,
        /// Include jobs that already left the live job table
        #[arg(long)]
        history: bool,
    },
    /// Print database statistics as JSON
    Stats,
    /// Print the usage of one user as JSON
    User { username: String },
    /// Print the most recent periodic task runs as JSON
    Tasks {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Run the periodic ingestion tasks until SIGINT/SIGTERM
    Run,
}

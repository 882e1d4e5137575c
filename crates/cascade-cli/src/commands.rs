//! CLI argument definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(author, version, about = "Distributed pipeline scheduler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the coordinator over a pipeline manifest
    Serve(ServeArgs),
    /// Run a worker that pulls stages from a coordinator
    Worker(WorkerArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Pipeline manifest (YAML)
    pub manifest: PathBuf,

    /// Workers to launch locally; 0 leaves execution to remote workers
    #[arg(long, default_value_t = 0)]
    pub num_exec: u32,

    /// How stage execution is arranged
    #[arg(long, value_enum, default_value_t = QueueMode::None)]
    pub queue: QueueMode,

    /// File to write the coordinator endpoint to
    #[arg(long)]
    pub urifile: Option<PathBuf>,

    /// Skip the urifile; workers are pointed at the coordinator directly
    #[arg(long)]
    pub use_ns: bool,

    /// Label for the checkpoint directory and exported batch jobs
    #[arg(long, default_value = "pipeline")]
    pub pipeline_name: String,

    /// Checkpoint directory (defaults to ./<pipeline_name>-backups)
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// Resume from the checkpoint instead of starting fresh
    #[arg(long)]
    pub restart: bool,

    /// Coordinator bind address
    #[arg(long, default_value = "127.0.0.1:0")]
    pub bind: SocketAddr,

    /// Batch submission command (queue = batch or script-only)
    #[arg(long)]
    pub submit_template: Option<String>,

    /// Output path for the script-only queue mode
    #[arg(long, default_value = "batch_script")]
    pub script_out: PathBuf,
}

#[derive(Args)]
pub struct WorkerArgs {
    /// Coordinator URL
    #[arg(long)]
    pub uri: Option<String>,

    /// File holding the coordinator URL
    #[arg(long)]
    pub urifile: Option<PathBuf>,

    /// Worker configuration file (YAML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker name, used in logs
    #[arg(long)]
    pub name: Option<String>,

    /// Memory available to a single stage, in gigabytes
    #[arg(long)]
    pub mem: Option<f64>,

    /// Processor slots available to a single stage
    #[arg(long)]
    pub procs: Option<u32>,

    /// Seconds to sleep between polls when nothing is runnable
    #[arg(long)]
    pub poll_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueueMode {
    /// Stages run on registered workers
    None,
    /// Workers are submitted through the batch queue
    Batch,
    /// Write the batch submission script and exit
    ScriptOnly,
}

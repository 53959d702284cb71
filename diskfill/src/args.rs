use crate::commands::{clear, inspect, run, worker};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "diskfill",
    about = "Fill a directory with random data up to a target size"
)]
pub struct Cli {
    /// Turn verbose logging on
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start writing and follow the progress, Ctrl-C stops the job
    Run(run::RunArgs),
    /// Print the status last reported in a directory
    Status(inspect::DirArgs),
    /// Ask the worker writing to a directory to stop
    Stop(inspect::DirArgs),
    /// List chunk files, oldest first
    List(inspect::ListArgs),
    /// Delete every file in a directory
    Clear(clear::ClearArgs),
    #[command(hide = true)]
    Worker(worker::WorkerArgs),
}

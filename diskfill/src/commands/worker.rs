use anyhow::{Context, Result};
use clap::Parser;
use diskfill::controller::decode_worker_config;
use diskfill::worker::run_worker;

#[derive(Parser, Debug)]
pub struct WorkerArgs {
    #[arg(long)]
    config_base64: String,
}

pub fn worker(args: WorkerArgs) -> Result<()> {
    let config = decode_worker_config(&args.config_base64).context("Failed to read job config")?;
    let report = run_worker(config).context("Worker failed")?;
    tracing::debug!("worker report: {report:?}");
    Ok(())
}

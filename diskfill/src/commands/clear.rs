use anyhow::{Result, bail};
use clap::Parser;
use diskfill::config::Settings;
use diskfill::controller::clear_dir;
use diskfill::{Status, poll_status};

use super::inspect::DirArgs;

#[derive(Parser, Debug)]
pub struct ClearArgs {
    #[command(flatten)]
    pub dir: DirArgs,

    /// Clear even if the status file says a job is still writing
    #[arg(short, long)]
    pub force: bool,
}

pub fn clear(args: ClearArgs, settings: &Settings) -> Result<()> {
    let work_dir = args.dir.resolve(settings)?;
    if let Status::Reported(snapshot) = poll_status(&work_dir)
        && !snapshot.is_terminal()
        && !args.force
    {
        bail!(
            "a job is still writing to {}, stop it first or pass --force",
            work_dir.display()
        );
    }
    let removed = clear_dir(&work_dir)?;
    println!("Removed {removed} files from {}", work_dir.display());
    Ok(())
}

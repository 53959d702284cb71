use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use comfy_table::presets::UTF8_FULL;
use diskfill::config::{MIB, Settings, stop_path};
use diskfill::controller::request_stop;
use diskfill::{Status, list_chunk_files, poll_status};

#[derive(Parser, Debug)]
pub struct DirArgs {
    /// Working directory, defaults to the configured one
    #[arg(short, long, value_name = "DIR")]
    pub dir: Option<PathBuf>,
}

impl DirArgs {
    pub fn resolve(&self, settings: &Settings) -> Result<PathBuf> {
        settings.resolve_work_dir(self.dir.clone())
    }
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub dir: DirArgs,

    /// Show at most this many files
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

pub fn status_report(work_dir: &Path) -> String {
    match poll_status(work_dir) {
        Status::NotStarted => format!("Status: not started\nDirectory: {}", work_dir.display()),
        Status::Reported(snapshot) => {
            let mut state = snapshot.terminal.to_string();
            if !snapshot.is_terminal() && stop_path(work_dir).exists() {
                state.push_str(" (stop requested)");
            }
            format!(
                "Status: {state}\n\
                 Directory: {}\n\
                 Current Size: {:.2} GB\n\
                 Files Created: {}\n\
                 Errors: {}",
                work_dir.display(),
                snapshot.size_gb,
                snapshot.file_count,
                snapshot.errors,
            )
        }
    }
}

pub fn status(args: DirArgs, settings: &Settings) -> Result<()> {
    let work_dir = args.resolve(settings)?;
    println!("{}", status_report(&work_dir));
    Ok(())
}

pub fn stop(args: DirArgs, settings: &Settings) -> Result<()> {
    let work_dir = args.resolve(settings)?;
    match poll_status(&work_dir) {
        Status::Reported(snapshot) if !snapshot.is_terminal() => {
            request_stop(&work_dir)
                .with_context(|| format!("Failed to request stop in {}", work_dir.display()))?;
            println!("Stop requested for {}", work_dir.display());
        }
        _ => println!("No active job in {}", work_dir.display()),
    }
    Ok(())
}

pub fn list(args: ListArgs, settings: &Settings) -> Result<()> {
    let work_dir = args.dir.resolve(settings)?;
    let limit = args.limit.unwrap_or(settings.list_limit);
    let files = list_chunk_files(&work_dir, limit)
        .with_context(|| format!("Failed to list {}", work_dir.display()))?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["file", "size (MB)", "modified"]);
    files.into_iter().for_each(|file| {
        table.add_row(vec![
            file.name,
            format!("{:.2}", file.size_bytes as f64 / MIB as f64),
            file.modified.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    });
    println!("{table}");
    Ok(())
}

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use diskfill::config::{GIB, Settings, WriteJobConfig};
use diskfill::watch::watch_job;
use diskfill::{Controller, JobView, Launcher, ProcessLauncher, ThreadLauncher};
use indicatif::{ProgressBar, ProgressStyle};

use super::inspect::DirArgs;
use crate::rt::block_on;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum ProgressMode {
    Auto,
    Rich,
    Plain,
    Quiet,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub dir: DirArgs,

    /// Target size of the directory in GB
    #[arg(short, long, value_name = "GB")]
    pub target_gb: Option<f64>,

    /// Size of each chunk file in MB
    #[arg(short, long, value_name = "MB")]
    pub chunk_mb: Option<u64>,

    /// How progress is reported
    #[arg(long, value_enum, default_value_t = ProgressMode::Auto)]
    pub progress: ProgressMode,

    /// Write from a thread of this process instead of a worker process
    #[arg(long)]
    pub in_process: bool,
}

enum Reporter {
    Rich(ProgressBar),
    Plain,
    Quiet,
}

impl Reporter {
    fn new(mode: ProgressMode, target_bytes: f64) -> Result<Self> {
        let mode = match mode {
            ProgressMode::Auto if std::io::stderr().is_terminal() => ProgressMode::Rich,
            ProgressMode::Auto => ProgressMode::Plain,
            mode => mode,
        };
        Ok(match mode {
            ProgressMode::Rich => {
                let progress_bar = ProgressBar::new(target_bytes as u64);
                progress_bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")?
                        .progress_chars("#>-"),
                );
                Reporter::Rich(progress_bar)
            }
            ProgressMode::Plain => Reporter::Plain,
            _ => Reporter::Quiet,
        })
    }

    fn update(&self, view: &JobView) {
        match self {
            Reporter::Rich(progress_bar) => {
                progress_bar.set_position((view.current_size_gb * GIB as f64) as u64);
                progress_bar.set_message(format!("{} files", view.file_count));
            }
            Reporter::Plain => eprintln!(
                "{:.2}/{:.2} GB ({:.1}%), {} files, {} errors",
                view.current_size_gb,
                view.target_size_gb(),
                view.percent(),
                view.file_count,
                view.errors
            ),
            Reporter::Quiet => {}
        }
    }

    fn finish(&self) {
        if let Reporter::Rich(progress_bar) = self {
            progress_bar.finish_and_clear();
        }
    }
}

async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn drive<L: Launcher>(
    mut controller: Controller<L>,
    config: WriteJobConfig,
    every: Duration,
    reporter: &Reporter,
) -> Result<JobView> {
    let work_dir: PathBuf = controller.start_job(config)?.work_dir;
    let outcome = block_on(watch_job(
        &mut controller,
        &work_dir,
        every,
        interrupted(),
        |view| reporter.update(view),
    ));
    reporter.finish();
    Ok(outcome??)
}

pub fn run(args: RunArgs, settings: &Settings) -> Result<()> {
    let work_dir = args.dir.resolve(settings)?;
    let config = WriteJobConfig::from_gb_mb(
        args.target_gb.unwrap_or(settings.target_gb),
        args.chunk_mb.unwrap_or(settings.chunk_mb),
        work_dir,
    );
    let reporter = Reporter::new(args.progress, config.target_size_bytes)?;
    let every = settings.poll_interval();

    let view = if args.in_process {
        drive(Controller::new(ThreadLauncher), config, every, &reporter)?
    } else {
        drive(
            Controller::new(ProcessLauncher::current_exe()?),
            config,
            every,
            &reporter,
        )?
    };

    let state = if view.implicit_stop {
        "stopped (worker exited without reporting)".to_string()
    } else {
        view.terminal.to_string()
    };
    println!(
        "Status: {state}\n\
         Directory: {}\n\
         Current Size: {:.2} GB\n\
         Target Size: {:.2} GB\n\
         Progress: {:.1}%\n\
         Files Created: {}\n\
         Errors: {}",
        view.work_dir.display(),
        view.current_size_gb,
        view.target_size_gb(),
        view.percent(),
        view.file_count,
        view.errors
    );
    Ok(())
}

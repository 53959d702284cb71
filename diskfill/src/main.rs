mod args;
mod commands;
mod rt;

use args::{Cli, Commands};
use clap::Parser;
use diskfill::config::Settings;
use tracing_subscriber::EnvFilter;

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let default_level = match (&cli.command, cli.verbose) {
        (_, true) => "debug",
        // the worker shares the terminal with the controller's progress output
        (Commands::Worker(_), false) => "warn",
        _ => "info",
    };
    init_tracing(default_level);

    let result = match cli.command {
        Commands::Run(args) => commands::run(args, &Settings::load_or_default()),
        Commands::Status(args) => commands::status(args, &Settings::load_or_default()),
        Commands::Stop(args) => commands::stop(args, &Settings::load_or_default()),
        Commands::List(args) => commands::list(args, &Settings::load_or_default()),
        Commands::Clear(args) => commands::clear(args, &Settings::load_or_default()),
        Commands::Worker(args) => commands::worker(args),
    };
    if let Err(e) = result {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

//! visaphoto CLI entrypoint.
//!
//! Parses arguments, installs logging and hands off to the runner. For
//! programmatic use, prefer the library API (`visaphoto::PhotoProcessor`).

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod args;
mod runner;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = args::CliArgs::parse();
    init_tracing(args.verbose);
    runner::run(&args)
}

mod cli;
mod config;
mod dispatch;
mod envelope;
mod external;
mod model;
mod pipeline;
mod queue;
mod storage;

use std::process;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "loc_census=debug"
    } else {
        "loc_census=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = cli::run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

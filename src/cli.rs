//! CLI interface for loc-census.
//!
//! Every command reads the same config file. `run` is the census itself;
//! the others are for operators poking at one piece of it:
//!
//! - `loc-census run`: dispatch every undone repository to a local pool.
//! - `loc-census catalog [--refresh]`: create (or replace) the snapshot.
//! - `loc-census analyze <owner/name> --language <tag>`: one repository,
//!   in-process, printed as an envelope.
//! - `loc-census status`: where the current snapshot stands.

mod analyze;
mod census;
mod format;
mod status;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::external::{ClocCounter, GhCommitResolver, GitFetcher, RetryPolicy};
use crate::pipeline::Pipeline;
use crate::storage::Storage;

/// loc-census: measure code volume across GitHub repositories.
#[derive(Debug, Parser)]
#[command(name = "loc-census", version, after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    /// Config file. Defaults to `$LOC_CENSUS_CONFIG`, then `./loc-census.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r#"Workflow:
  1. loc-census catalog            → queries GitHub once, writes repos.json
  2. loc-census run                → analyses every repository without a result
  3. loc-census status             → settled / rejected / failed / undone
  An interrupted run is safe to repeat: settled repositories are skipped.

Debugging one repository:
  loc-census analyze rust-lang/cargo --language rust --old"#;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the census: bootstrap directories, then dispatch every undone
    /// repository in the catalog snapshot to a local worker pool.
    ///
    /// Creates the snapshot first if there is none.
    Run,

    /// Create the catalog snapshot if it is missing. Prints its size.
    Catalog {
        /// Query the catalog source again and replace the snapshot.
        #[arg(long)]
        refresh: bool,
    },

    /// Analyse a single repository in-process and print the result envelope.
    ///
    /// Nothing is persisted.
    Analyze {
        /// Repository in `owner/name` form.
        full_name: String,

        /// Catalog language tag (e.g. `python`, `c++`).
        #[arg(long)]
        language: String,

        /// Use the old-period cutoff instead of the new one.
        #[arg(long)]
        old: bool,

        /// Clone URL, if not the GitHub default.
        #[arg(long)]
        remote_url: Option<String>,
    },

    /// Summarise the results for the current snapshot.
    Status,
}

/// Run the CLI, returning an error message on failure.
pub fn run(cli: Cli) -> Result<(), String> {
    let path = Config::locate(cli.config.as_deref());
    let config = Config::load(&path).map_err(|e| format!("{}: {e}", path.display()))?;

    match cli.command {
        Command::Run => census::cmd_run(&config),
        Command::Catalog { refresh } => census::cmd_catalog(&config, refresh),
        Command::Analyze {
            full_name,
            language,
            old,
            remote_url,
        } => analyze::cmd_analyze(&config, &full_name, &language, old, remote_url),
        Command::Status => status::cmd_status(&config),
    }
}

fn open_storage(config: &Config) -> Result<Storage, String> {
    Storage::new(&config.main.data_dir).map_err(|e| {
        format!(
            "failed to open data directory {}: {e}",
            config.main.data_dir.display()
        )
    })
}

/// A pipeline wired to the production collaborators, fetching into `work_dir`.
fn build_pipeline(config: &Config, work_dir: &Path) -> Pipeline {
    let retry = RetryPolicy::new(
        config.catalog.max_retries,
        std::time::Duration::from_secs(config.catalog.initial_backoff_secs),
    );
    Pipeline::new(
        Box::new(GhCommitResolver::new(retry)),
        Box::new(GitFetcher::new(work_dir)),
        Box::new(ClocCounter::default()),
        config.analysis,
    )
}

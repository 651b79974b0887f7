//! External collaborators: the tools the census reaches out to.
//!
//! Each collaborator is a trait so the pipeline and dispatcher can run
//! against in-memory fakes. The production implementations shell out:
//!
//! - [`GhCatalog`] and [`GhCommitResolver`] use `gh api`
//! - [`GitFetcher`] uses `git`
//! - [`ClocCounter`] uses `cloc`

mod cloc;
mod git;
mod github;
mod retry;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use jiff::Timestamp;
use tracing::debug;

use crate::model::{LineStats, RepoDescriptor};

pub use cloc::{ClocCounter, counter_language};
pub use git::GitFetcher;
pub use github::{GhCatalog, GhCommitResolver};
pub use retry::RetryPolicy;

/// Produces the candidate repositories for a census.
pub trait CatalogSource {
    fn discover(&self) -> Result<Vec<RepoDescriptor>, CatalogError>;
}

/// Finds the last commit on or before a cutoff.
pub trait CommitResolver {
    fn resolve(&self, repo: &RepoDescriptor, cutoff: Timestamp) -> Result<String, ResolveError>;
}

/// Materialises a single commit on local disk.
pub trait SourceFetcher {
    fn fetch(&self, remote_url: &str, commit_id: &str) -> Result<PathBuf, FetchError>;
}

/// Counts lines for one language under a path.
///
/// `language` is in the counter's own vocabulary (see [`counter_language`]).
/// `Ok(None)` means the tool ran but found nothing in that language.
pub trait LineCounter {
    fn count(&self, path: &Path, language: &str) -> Result<Option<LineStats>, CountError>;
}

/// A subprocess that could not be run or exited unsuccessfully.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    Failed { command: String, stderr: String },
}

impl CommandError {
    /// Whether the failure was the remote API throttling us.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Failed { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                stderr.contains("rate limit") || stderr.contains("http 429")
            }
            Self::Spawn { .. } => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("malformed search response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("all {failed} search pages failed; last error: {last}")]
    NoData {
        failed: usize,
        #[source]
        last: Box<CatalogError>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no commit on or before the cutoff")]
    NotFound,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("malformed commits response: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to reset {path}: {source}")]
    Reset {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, thiserror::Error)]
pub enum CountError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("unparsable counter output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Run a prepared command, returning its output on a zero exit status.
fn run(command: &mut Command) -> Result<Output, CommandError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let rendered = render(command);
    debug!(command = %rendered, "running");

    let output = command.output().map_err(|source| CommandError::Spawn {
        program: program.clone(),
        source,
    })?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(CommandError::Failed {
            command: rendered,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Run a prepared command and return its stdout as text.
fn run_stdout(command: &mut Command) -> Result<String, CommandError> {
    let output = run(command)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn render(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(command.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

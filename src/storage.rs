//! Local persistence for the catalog snapshot and per-repository results.
//!
//! Everything lives under the configured data directory:
//!
//! ```text
//! <data-dir>/
//!   repos.json                   # Catalog snapshot, written once
//!   results/
//!     <slug>-<digest>.json       # One settled AnalysisResult per repository
//! ```
//!
//! Both kinds of file hold envelope-encoded JSON and are only ever written
//! through [`atomic::write_atomic`], so a reader never sees a partial file.

mod atomic;
mod catalog;
mod key;

use std::{fs, io, path::PathBuf};

use tracing::debug;

use crate::envelope::{Envelope, EnvelopeError};
use crate::model::{AnalysisResult, RepoDescriptor};

pub use key::result_key;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no catalog snapshot at {0}")]
    CatalogMissing(PathBuf),

    #[error("failed to write {path} atomically: {source}")]
    AtomicWrite { path: PathBuf, source: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

pub type Result<T> = core::result::Result<T, StorageError>;

const RESULTS_DIRNAME: &str = "results";

/// File-based storage rooted at a data directory.
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Creates a storage instance rooted at the given data directory.
    ///
    /// The directory and its `results/` subdirectory are created if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(RESULTS_DIRNAME))?;
        Ok(Self { root })
    }

    fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIRNAME)
    }

    // ── Results ──

    /// The canonical result path for a descriptor.
    ///
    /// Pure: depends only on `(full_name, language)`.
    pub fn path_for(&self, descriptor: &RepoDescriptor) -> PathBuf {
        let key = result_key(&descriptor.full_name, &descriptor.language);
        self.results_dir().join(format!("{key}.json"))
    }

    /// Whether a result has already been persisted for this descriptor.
    pub fn is_settled(&self, descriptor: &RepoDescriptor) -> bool {
        self.path_for(descriptor).is_file()
    }

    /// Writes a result to its canonical path.
    ///
    /// The file appears at the canonical path complete or not at all.
    /// Does not check for an existing result; callers skip settled
    /// descriptors before dispatching them.
    pub fn persist(&self, result: &AnalysisResult) -> Result<PathBuf> {
        let path = self.path_for(&result.target_identity);
        let bytes = serde_json::to_vec_pretty(&Envelope::encode(result)?)
            .map_err(EnvelopeError::from)?;
        atomic::write_bytes(&path, &bytes).map_err(|source| StorageError::AtomicWrite {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Loads every persisted result, sorted by repository name.
    pub fn list_results(&self) -> Result<Vec<AnalysisResult>> {
        let mut results = Vec::new();
        for entry in fs::read_dir(self.results_dir())? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") || atomic::is_temp_file(&path) {
                continue;
            }
            let bytes = fs::read(&path)?;
            results.push(Envelope::from_bytes(&bytes)?.decode_as::<AnalysisResult>()?);
        }
        results.sort_by(|a, b| {
            a.target_identity
                .full_name
                .cmp(&b.target_identity.full_name)
                .then_with(|| a.target_identity.language.cmp(&b.target_identity.language))
        });
        Ok(results)
    }

    // ── Maintenance ──

    /// Removes temp files left behind by an interrupted write.
    ///
    /// Returns how many were removed.
    pub fn sweep_temp(&self) -> Result<usize> {
        let mut removed = 0;
        for dir in [self.root.clone(), self.results_dir()] {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_file() && atomic::is_temp_file(&path) {
                    debug!(path = %path.display(), "removing stale temp file");
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

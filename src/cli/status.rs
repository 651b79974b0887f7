//! Snapshot status: how many repositories are settled, and how.

use std::collections::{HashMap, HashSet};

use crate::config::Config;
use crate::model::RepoDescriptor;
use crate::storage::{Storage, StorageError};

use super::format::format_status;
use super::open_storage;

/// Tally of the snapshot's repositories by outcome.
#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct StatusCounts {
    pub succeeded: usize,
    /// Measured, then refused by the threshold.
    pub rejected: usize,
    pub failed: usize,
    pub undone: usize,
    pub code_lines: u64,
}

pub(super) fn cmd_status(config: &Config) -> Result<(), String> {
    let storage = open_storage(config)?;
    if !storage.has_catalog() {
        return Err("no catalog snapshot yet; run `loc-census catalog` first".to_string());
    }
    let catalog = storage
        .load_catalog()
        .map_err(|e| format!("failed to load catalog: {e}"))?;
    let counts = tally(&storage, &catalog).map_err(|e| format!("failed to read results: {e}"))?;

    println!("{}", format_status(catalog.len(), &counts));
    Ok(())
}

fn tally(storage: &Storage, catalog: &[RepoDescriptor]) -> Result<StatusCounts, StorageError> {
    let mut results: HashMap<_, _> = storage
        .list_results()?
        .into_iter()
        .map(|r| (storage.path_for(&r.target_identity), r))
        .collect();

    let mut counts = StatusCounts::default();
    let mut seen = HashSet::new();
    for descriptor in catalog {
        let path = storage.path_for(descriptor);
        if !seen.insert(path.clone()) {
            continue;
        }
        match results.remove(&path) {
            None => counts.undone += 1,
            Some(result) if result.success => {
                counts.succeeded += 1;
                counts.code_lines += result.line_stats.map_or(0, |s| s.code);
            }
            Some(result) if result.was_measured() => counts.rejected += 1,
            Some(_) => counts.failed += 1,
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::model::{AnalysisResult, LineStats, reason};

    #[test]
    fn tallies_each_outcome_once() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path()).unwrap();

        let ok = RepoDescriptor::from_github_name("octo/ok", "python", false);
        let small = RepoDescriptor::from_github_name("octo/small", "python", false);
        let broken = RepoDescriptor::from_github_name("octo/broken", "python", true);
        let pending = RepoDescriptor::from_github_name("octo/pending", "python", true);
        let stats = |code| LineStats {
            code,
            comment: 0,
            blank: 0,
        };

        storage
            .persist(&AnalysisResult::succeeded(ok.clone(), "a".into(), stats(500)))
            .unwrap();
        storage
            .persist(&AnalysisResult::rejected(
                small.clone(),
                "b".into(),
                reason::TOO_FEW_CODE_LINES,
                stats(3),
            ))
            .unwrap();
        storage
            .persist(&AnalysisResult::failed(
                broken.clone(),
                None,
                reason::COMMIT_NOT_FOUND,
            ))
            .unwrap();

        let catalog = vec![ok.clone(), small, broken, pending, ok];
        let counts = tally(&storage, &catalog).unwrap();

        assert_eq!(
            counts,
            StatusCounts {
                succeeded: 1,
                rejected: 1,
                failed: 1,
                undone: 1,
                code_lines: 500,
            }
        );
    }
}

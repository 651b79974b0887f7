//! Analysis targets: a descriptor bound to a resolved commit.

use serde::{Deserialize, Serialize};

use super::RepoDescriptor;

/// A repository pinned to the commit that will be measured.
///
/// Only the worker pipeline creates targets, and only after commit
/// resolution succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisTarget {
    #[serde(with = "crate::envelope::nested")]
    pub descriptor: RepoDescriptor,
    pub commit_id: String,
}

impl AnalysisTarget {
    /// Binds a descriptor to a commit. Returns `None` for an empty commit id.
    pub fn new(descriptor: RepoDescriptor, commit_id: impl Into<String>) -> Option<Self> {
        let commit_id = commit_id.into();
        if commit_id.trim().is_empty() {
            return None;
        }
        Some(Self {
            descriptor,
            commit_id,
        })
    }
}

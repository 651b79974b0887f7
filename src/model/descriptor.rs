//! Repository descriptors: candidates produced by the catalog.

use serde::{Deserialize, Serialize};

/// A candidate repository before a commit is chosen.
///
/// `full_name` is the `owner/name` form and is case-sensitive.
/// Two descriptors may share a name when they were discovered for
/// different languages; storage keys both fields jointly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoDescriptor {
    pub full_name: String,

    /// The catalog language tag this repository was discovered under.
    pub language: String,

    /// Discovered in the older of the two configured periods.
    pub is_old_period: bool,

    /// Clone URL.
    pub remote_url: String,

    /// API endpoint listing the repository's commits.
    pub commits_endpoint: String,
}

impl RepoDescriptor {
    /// Builds a descriptor from a bare `owner/name`, deriving the GitHub
    /// clone URL and commits endpoint.
    pub fn from_github_name(full_name: &str, language: &str, is_old_period: bool) -> Self {
        Self {
            full_name: full_name.to_string(),
            language: language.to_string(),
            is_old_period,
            remote_url: format!("https://github.com/{full_name}.git"),
            commits_endpoint: format!("https://api.github.com/repos/{full_name}/commits"),
        }
    }

    /// Which period this descriptor belongs to, for log output.
    pub fn period(&self) -> &'static str {
        if self.is_old_period { "old" } else { "new" }
    }
}

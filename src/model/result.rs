//! Analysis results: the terminal record for one repository.

use serde::{Deserialize, Serialize};

use super::RepoDescriptor;

/// Failure reasons recorded on unsuccessful results.
pub mod reason {
    pub const COMMIT_NOT_FOUND: &str = "commit not found";
    pub const UNSUPPORTED_LANGUAGE: &str = "unsupported language";
    pub const NO_DATA_FOR_LANGUAGE: &str = "no data for language";
    pub const TOO_FEW_CODE_LINES: &str = "too few code lines";
}

/// Per-language line counts reported by the line counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineStats {
    pub code: u64,
    pub comment: u64,
    pub blank: u64,
}

/// The outcome of analysing one repository.
///
/// `line_stats` is present on success and on threshold rejections, where
/// the measurement worked but the filter refused it. `failure_reason` is
/// present whenever `success` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(with = "crate::envelope::nested")]
    pub target_identity: RepoDescriptor,

    pub success: bool,

    /// The commit that was measured, once resolution succeeded.
    #[serde(default)]
    pub commit_id: Option<String>,

    #[serde(default, with = "crate::envelope::nested_opt")]
    pub line_stats: Option<LineStats>,

    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl AnalysisResult {
    pub fn succeeded(descriptor: RepoDescriptor, commit_id: String, stats: LineStats) -> Self {
        Self {
            target_identity: descriptor,
            success: true,
            commit_id: Some(commit_id),
            line_stats: Some(stats),
            failure_reason: None,
        }
    }

    /// A failure before anything could be measured.
    pub fn failed(
        descriptor: RepoDescriptor,
        commit_id: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            target_identity: descriptor,
            success: false,
            commit_id,
            line_stats: None,
            failure_reason: Some(reason.into()),
        }
    }

    /// Measured, but refused by a filter. Keeps the measurement.
    pub fn rejected(
        descriptor: RepoDescriptor,
        commit_id: String,
        reason: impl Into<String>,
        stats: LineStats,
    ) -> Self {
        Self {
            target_identity: descriptor,
            success: false,
            commit_id: Some(commit_id),
            line_stats: Some(stats),
            failure_reason: Some(reason.into()),
        }
    }

    /// Whether the counter produced a measurement, regardless of filtering.
    pub fn was_measured(&self) -> bool {
        self.line_stats.is_some()
    }
}

//! Worker pipeline: resolve, fetch, count, filter.
//!
//! [`Pipeline::execute`] never fails. Every problem along the way becomes
//! an unsuccessful [`AnalysisResult`] with a reason, so the only thing a
//! worker can hand back to the dispatcher is a result (or, if the worker
//! itself dies, nothing at all).

use tracing::{debug, info, info_span, warn};

use crate::config::AnalysisConfig;
use crate::envelope::{Envelope, EnvelopeError};
use crate::external::{CommitResolver, LineCounter, SourceFetcher, counter_language};
use crate::model::{AnalysisResult, AnalysisTarget, RepoDescriptor, reason};

/// One worker's set of collaborators.
///
/// A pipeline owns a fetcher and therefore a fetch directory, so it runs
/// one task at a time.
pub struct Pipeline {
    resolver: Box<dyn CommitResolver + Send>,
    fetcher: Box<dyn SourceFetcher + Send>,
    counter: Box<dyn LineCounter + Send>,
    settings: AnalysisConfig,
}

impl Pipeline {
    pub fn new(
        resolver: Box<dyn CommitResolver + Send>,
        fetcher: Box<dyn SourceFetcher + Send>,
        counter: Box<dyn LineCounter + Send>,
        settings: AnalysisConfig,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            counter,
            settings,
        }
    }

    /// Analyse one repository.
    pub fn execute(&self, descriptor: &RepoDescriptor) -> AnalysisResult {
        let _span = info_span!("analyze", repo = %descriptor.full_name, language = %descriptor.language)
            .entered();

        let result = self.analyze(descriptor);
        match (&result.failure_reason, &result.line_stats) {
            (None, Some(stats)) => info!(code = stats.code, "measured"),
            (Some(reason), _) => info!(%reason, "not measured"),
            (None, None) => {}
        }
        result
    }

    fn analyze(&self, descriptor: &RepoDescriptor) -> AnalysisResult {
        let cutoff = self.settings.cutoff_for(descriptor.is_old_period);
        let commit_id = match self.resolver.resolve(descriptor, cutoff) {
            Ok(commit_id) => commit_id,
            Err(e) => {
                debug!(%cutoff, error = %e, "commit resolution failed");
                return AnalysisResult::failed(descriptor.clone(), None, reason::COMMIT_NOT_FOUND);
            }
        };
        let Some(target) = AnalysisTarget::new(descriptor.clone(), commit_id) else {
            return AnalysisResult::failed(descriptor.clone(), None, reason::COMMIT_NOT_FOUND);
        };
        debug!(commit = %target.commit_id, "resolved");

        let AnalysisTarget {
            descriptor,
            commit_id,
        } = target;

        let path = match self.fetcher.fetch(&descriptor.remote_url, &commit_id) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "fetch failed");
                return AnalysisResult::failed(
                    descriptor,
                    Some(commit_id),
                    format!("fetch failed: {e}"),
                );
            }
        };

        let Some(language) = counter_language(&descriptor.language) else {
            return AnalysisResult::failed(
                descriptor,
                Some(commit_id),
                reason::UNSUPPORTED_LANGUAGE,
            );
        };

        let stats = match self.counter.count(&path, language) {
            Ok(Some(stats)) => stats,
            Ok(None) => {
                return AnalysisResult::failed(
                    descriptor,
                    Some(commit_id),
                    reason::NO_DATA_FOR_LANGUAGE,
                );
            }
            Err(e) => {
                warn!(error = %e, "count failed");
                return AnalysisResult::failed(
                    descriptor,
                    Some(commit_id),
                    format!("count failed: {e}"),
                );
            }
        };

        if stats.code < self.settings.min_code_lines {
            return AnalysisResult::rejected(
                descriptor,
                commit_id,
                reason::TOO_FEW_CODE_LINES,
                stats,
            );
        }
        AnalysisResult::succeeded(descriptor, commit_id, stats)
    }

    /// Run one task received over the wire.
    ///
    /// The payload must be an envelope holding a `RepoDescriptor`; the
    /// reply is an envelope holding the `AnalysisResult`.
    pub fn run_task(&self, payload: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let descriptor: RepoDescriptor = Envelope::from_bytes(payload)?.decode_as()?;
        let result = self.execute(&descriptor);
        Envelope::encode(&result)?.to_bytes()
    }
}

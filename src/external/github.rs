//! GitHub collaborators: repository search and commit lookup.
//!
//! Both talk to the REST API through `gh api`, which takes care of
//! authentication. Rate-limited calls are retried with backoff.

use std::collections::HashSet;
use std::process::Command;
use std::time::Duration;

use jiff::Timestamp;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{CatalogConfig, FilterConfig};
use crate::model::RepoDescriptor;

use super::{
    CatalogError, CatalogSource, CommandError, CommitResolver, ResolveError, RetryPolicy,
    run_stdout,
};

const API_ROOT: &str = "https://api.github.com/";

/// Run `gh` with the given args and return stdout.
fn gh(args: &[&str]) -> Result<String, CommandError> {
    run_stdout(Command::new("gh").args(args))
}

// ── Catalog ──

/// JSON shape of a `search/repositories` page.
#[derive(Debug, Deserialize)]
struct SearchPage {
    items: Vec<SearchItem>,
}

/// The fields of a search hit that a descriptor needs.
#[derive(Debug, Deserialize)]
struct SearchItem {
    full_name: String,
    clone_url: String,
    /// URI template, e.g. `https://api.github.com/repos/o/r/commits{/sha}`.
    commits_url: String,
}

/// Repository search over every configured language and both periods.
pub struct GhCatalog {
    filters: FilterConfig,
    per_page: u32,
    pages: u32,
    retry: RetryPolicy,
}

impl GhCatalog {
    pub fn new(filters: &FilterConfig, catalog: &CatalogConfig) -> Self {
        Self {
            filters: filters.clone(),
            per_page: catalog.per_page,
            pages: catalog.pages,
            retry: RetryPolicy::new(
                catalog.max_retries,
                Duration::from_secs(catalog.initial_backoff_secs),
            ),
        }
    }

    /// The search qualifier string for one language and period.
    fn query(&self, language: &str, is_old_period: bool) -> String {
        let (created, pushed) = if is_old_period {
            (&self.filters.old_created, &self.filters.old_pushed)
        } else {
            (&self.filters.new_created, &self.filters.new_pushed)
        };
        format!(
            "language:{language} size:{} stars:{} created:{created} pushed:{pushed}",
            self.filters.size, self.filters.stars
        )
    }

    fn fetch_page(&self, query: &str, page: u32) -> Result<Vec<SearchItem>, CatalogError> {
        let q = format!("q={query}");
        let per_page = format!("per_page={}", self.per_page);
        let page = format!("page={page}");
        let json = self.retry.run(|| {
            gh(&[
                "api",
                "-X",
                "GET",
                "search/repositories",
                "-H",
                "Accept: application/vnd.github+json",
                "-f",
                &q,
                "-f",
                &per_page,
                "-f",
                &page,
            ])
        })?;
        Ok(parse_search_page(&json)?)
    }
}

impl CatalogSource for GhCatalog {
    fn discover(&self) -> Result<Vec<RepoDescriptor>, CatalogError> {
        self.walk(|query, page| self.fetch_page(query, page))
    }
}

impl GhCatalog {
    /// Page through every language and period with `fetch`.
    ///
    /// A failing page is skipped. If no page answered at all, the last
    /// error is returned so that no snapshot gets written.
    fn walk(
        &self,
        mut fetch: impl FnMut(&str, u32) -> Result<Vec<SearchItem>, CatalogError>,
    ) -> Result<Vec<RepoDescriptor>, CatalogError> {
        let mut seen = HashSet::new();
        let mut descriptors = Vec::new();
        let mut answered = 0usize;
        let mut failed = 0usize;
        let mut last_error = None;

        for language in self.filters.languages.iter().map(|l| l.trim()) {
            if language.is_empty() {
                continue;
            }
            for is_old_period in [false, true] {
                let query = self.query(language, is_old_period);
                let period = if is_old_period { "old" } else { "new" };
                info!(%language, period, "searching");

                for page in 1..=self.pages {
                    let items = match fetch(&query, page) {
                        Ok(items) => items,
                        // Without gh there is nothing to fall back to.
                        Err(CatalogError::Command(e @ CommandError::Spawn { .. })) => {
                            return Err(e.into());
                        }
                        Err(e) => {
                            warn!(%language, page, error = %e, "no data for page");
                            failed += 1;
                            last_error = Some(e);
                            continue;
                        }
                    };
                    answered += 1;
                    if items.is_empty() {
                        debug!(%language, page, "search exhausted");
                        break;
                    }
                    for item in items {
                        if !seen.insert(item.full_name.clone()) {
                            debug!(repo = %item.full_name, "duplicate search hit");
                            continue;
                        }
                        descriptors.push(descriptor_from_item(item, language, is_old_period));
                    }
                }
            }
        }

        if answered == 0
            && let Some(last) = last_error
        {
            return Err(CatalogError::NoData {
                failed,
                last: Box::new(last),
            });
        }
        if failed > 0 {
            warn!(failed, answered, "catalog is missing pages that failed");
        }
        info!(count = descriptors.len(), "catalog discovered");
        Ok(descriptors)
    }
}

fn parse_search_page(json: &str) -> Result<Vec<SearchItem>, serde_json::Error> {
    Ok(serde_json::from_str::<SearchPage>(json)?.items)
}

fn descriptor_from_item(item: SearchItem, language: &str, is_old_period: bool) -> RepoDescriptor {
    let commits_endpoint = match item.commits_url.split_once('{') {
        Some((base, _)) => base.to_string(),
        None => item.commits_url,
    };
    RepoDescriptor {
        full_name: item.full_name,
        language: language.to_string(),
        is_old_period,
        remote_url: item.clone_url,
        commits_endpoint,
    }
}

// ── Commit resolution ──

#[derive(Debug, Deserialize)]
struct CommitItem {
    sha: String,
}

/// Looks up the newest commit not after the cutoff via the commits endpoint.
pub struct GhCommitResolver {
    retry: RetryPolicy,
}

impl GhCommitResolver {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }
}

impl CommitResolver for GhCommitResolver {
    fn resolve(&self, repo: &RepoDescriptor, cutoff: Timestamp) -> Result<String, ResolveError> {
        let endpoint = api_path(&repo.commits_endpoint);
        let until = format!("until={cutoff}");
        let result = self.retry.run(|| {
            gh(&[
                "api",
                "-X",
                "GET",
                endpoint,
                "-f",
                &until,
                "-f",
                "per_page=1",
            ])
        });

        let json = match result {
            Ok(json) => json,
            // An empty repository answers 409 Conflict.
            Err(CommandError::Failed { ref stderr, .. }) if stderr.contains("HTTP 409") => {
                return Err(ResolveError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };
        parse_first_commit(&json)
    }
}

/// Strip the API host so `gh api` accepts the endpoint as a path.
fn api_path(endpoint: &str) -> &str {
    endpoint.strip_prefix(API_ROOT).unwrap_or(endpoint)
}

fn parse_first_commit(json: &str) -> Result<String, ResolveError> {
    let commits: Vec<CommitItem> = serde_json::from_str(json)?;
    commits
        .into_iter()
        .next()
        .map(|c| c.sha)
        .filter(|sha| !sha.is_empty())
        .ok_or(ResolveError::NotFound)
}

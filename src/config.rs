//! loc-census configuration.
//!
//! Loaded from a TOML file located by, in order: the `--config` flag, the
//! `LOC_CENSUS_CONFIG` environment variable, `./loc-census.toml`.
//!
//! ```toml
//! [main]
//! data-dir = "./data"
//! tmp-dir = "./tmp"
//!
//! [filters]
//! languages = ["python", "java"]
//! size = "1000..50000"
//! stars = ">=100"
//! old-created = "2010-01-01..2011-12-31"
//! old-pushed = ">=2012-01-01"
//! new-created = "2016-01-01..2017-12-31"
//! new-pushed = ">=2018-01-01"
//!
//! [analysis]
//! old-cutoff = "2012-01-01T00:00:00Z"
//! new-cutoff = "2018-01-01T00:00:00Z"
//! min-code-lines = 1000
//! ```

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use jiff::Timestamp;
use serde::Deserialize;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "LOC_CENSUS_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./loc-census.toml";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config file found at {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to prepare {path}: {source}")]
    Prepare { path: PathBuf, source: io::Error },
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub main: MainConfig,
    pub filters: FilterConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Paths and startup behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MainConfig {
    /// Holds the catalog snapshot and the results directory.
    pub data_dir: PathBuf,

    /// Scratch space; wiped at startup.
    pub tmp_dir: PathBuf,

    /// Root of the per-worker fetch directories. Defaults to `<tmp-dir>/work`.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Delete the whole data directory at startup.
    #[serde(default)]
    pub debug_remove_data: bool,
}

/// Repository search qualifiers, in GitHub search syntax.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FilterConfig {
    pub languages: Vec<String>,
    pub size: String,
    pub stars: String,
    pub old_created: String,
    pub old_pushed: String,
    pub new_created: String,
    pub new_pushed: String,
}

/// Catalog pagination and rate-limit backoff.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct CatalogConfig {
    pub per_page: u32,
    pub pages: u32,
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            per_page: 30,
            pages: 1,
            max_retries: 5,
            initial_backoff_secs: 10,
        }
    }
}

/// Worker pipeline settings.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Commit cutoff for repositories from the old period.
    pub old_cutoff: Timestamp,

    /// Commit cutoff for repositories from the new period.
    pub new_cutoff: Timestamp,

    /// Results with fewer code lines are rejected.
    #[serde(default)]
    pub min_code_lines: u64,
}

impl AnalysisConfig {
    /// The cutoff that applies to a descriptor's period.
    pub fn cutoff_for(&self, is_old_period: bool) -> Timestamp {
        if is_old_period {
            self.old_cutoff
        } else {
            self.new_cutoff
        }
    }
}

/// Dispatcher window and worker pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct DispatchConfig {
    pub workers: usize,

    /// Low-water mark: above this, the oldest task is polled after each submit.
    pub min_in_flight: usize,

    /// High-water mark: submission blocks while the window is this full.
    pub max_in_flight: usize,

    /// Bounded wait for a single poll.
    pub poll_timeout_ms: u64,

    /// Bounded wait per task once the catalog is exhausted.
    pub final_drain_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            min_in_flight: 8,
            max_in_flight: 32,
            poll_timeout_ms: 1000,
            final_drain_timeout_secs: 3600,
        }
    }
}

impl DispatchConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn final_drain_timeout(&self) -> Duration {
        Duration::from_secs(self.final_drain_timeout_secs)
    }
}

impl Config {
    /// Pick the config path: explicit flag, then environment, then default.
    pub fn locate(explicit: Option<&Path>) -> PathBuf {
        locate_with(explicit, env::var(CONFIG_ENV).ok())
    }

    /// Load and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::from_toml(&contents)
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.filters.languages.iter().all(|l| l.trim().is_empty()) {
            return invalid("filters.languages must name at least one language");
        }
        if !(1..=100).contains(&self.catalog.per_page) {
            return invalid("catalog.per-page must be between 1 and 100");
        }
        if self.dispatch.workers == 0 {
            return invalid("dispatch.workers must be at least 1");
        }
        if self.dispatch.max_in_flight == 0 {
            return invalid("dispatch.max-in-flight must be at least 1");
        }
        if self.dispatch.min_in_flight > self.dispatch.max_in_flight {
            return invalid("dispatch.min-in-flight must not exceed dispatch.max-in-flight");
        }
        Ok(())
    }

    /// The fetch directory root.
    pub fn work_dir(&self) -> PathBuf {
        self.main
            .work_dir
            .clone()
            .unwrap_or_else(|| self.main.tmp_dir.join("work"))
    }

    /// Bootstrap the filesystem for a run.
    ///
    /// Optionally wipes the data directory, ensures it exists, and recreates
    /// the temp directory from scratch.
    pub fn prepare_dirs(&self) -> Result<(), ConfigError> {
        let data_dir = &self.main.data_dir;
        if self.main.debug_remove_data {
            remove_dir_if_exists(data_dir).map_err(prepare(data_dir))?;
        }
        fs::create_dir_all(data_dir).map_err(prepare(data_dir))?;

        let tmp_dir = &self.main.tmp_dir;
        remove_dir_if_exists(tmp_dir).map_err(prepare(tmp_dir))?;
        fs::create_dir_all(tmp_dir).map_err(prepare(tmp_dir))?;

        let work_dir = self.work_dir();
        fs::create_dir_all(&work_dir).map_err(prepare(&work_dir))?;
        Ok(())
    }
}

fn locate_with(explicit: Option<&Path>, from_env: Option<String>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = from_env
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn prepare(path: &Path) -> impl FnOnce(io::Error) -> ConfigError {
    let path = path.to_path_buf();
    move |source| ConfigError::Prepare { path, source }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
